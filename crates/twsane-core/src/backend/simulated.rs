//! Simulated backend for the CLI and unit tests.
//!
//! Offers a flatbed and a sheet-feeder device with the usual SANE option
//! set and generates deterministic pixel data for every frame format.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::option::{
    NumericConstraint, OptionCaps, OptionDescriptor, OptionKind, OptionValue, Unit,
    constrain_value,
};
use super::traits::{
    Backend, BackendError, BackendStatus, Credentials, DeviceInfo, FrameFormat, HandleId,
    Parameters, SetInfo,
};

const OPT_COUNT: usize = 0;
const OPT_MODE: usize = 2;
const OPT_DEPTH: usize = 3;
const OPT_RESOLUTION: usize = 4;
const OPT_THREE_PASS: usize = 6;
const OPT_HAND_SCANNER: usize = 7;
const OPT_TL_X: usize = 9;
const OPT_TL_Y: usize = 10;
const OPT_BR_X: usize = 11;
const OPT_BR_Y: usize = 12;
const NUM_OPTIONS: usize = 16;

/// Challenge embedded in access-denied resources.
const CHALLENGE: &str = "5f3c8a91d2e04b67";

fn sane_fix(v: f64) -> i32 {
    (v * 65536.0).round() as i32
}

fn sane_unfix(w: i32) -> f64 {
    w as f64 / 65536.0
}

/// Kind of simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedModel {
    /// Letter/A4 flatbed with lineart, gray and color modes.
    Flatbed,
    /// Legal-size feeder reached over the network, gray and color only.
    Feeder,
}

impl SimulatedModel {
    fn info(self) -> DeviceInfo {
        match self {
            SimulatedModel::Flatbed => DeviceInfo {
                name: "sim:flatbed".into(),
                vendor: "Simulated".into(),
                model: "Flatbed 2400".into(),
                kind: "flatbed scanner".into(),
            },
            SimulatedModel::Feeder => DeviceInfo {
                name: "net:scanhost:sim:feeder".into(),
                vendor: "Simulated".into(),
                model: "Feeder 600".into(),
                kind: "sheetfed scanner".into(),
            },
        }
    }

    fn modes(self) -> Vec<String> {
        match self {
            SimulatedModel::Flatbed => vec!["Lineart".into(), "Gray".into(), "Color".into()],
            SimulatedModel::Feeder => vec!["Gray".into(), "Color".into()],
        }
    }

    fn resolution(self) -> NumericConstraint {
        match self {
            SimulatedModel::Flatbed => NumericConstraint::Range {
                min: 50,
                max: 1200,
                quant: 1,
            },
            SimulatedModel::Feeder => NumericConstraint::WordList(vec![75, 150, 300, 600]),
        }
    }

    /// Bed size in millimetres.
    fn bed(self) -> (f64, f64) {
        match self {
            SimulatedModel::Flatbed => (215.9, 297.0),
            SimulatedModel::Feeder => (215.9, 355.6),
        }
    }

    fn descriptor(self, index: usize) -> Option<OptionDescriptor> {
        let (width, height) = self.bed();
        let geometry = |name: &str, title: &str, max: f64| {
            option(
                name,
                title,
                Unit::Mm,
                OptionKind::Fixed(NumericConstraint::Range {
                    min: 0,
                    max: sane_fix(max),
                    quant: 0,
                }),
            )
        };
        let percent = |name: &str, title: &str| OptionDescriptor {
            caps: OptionCaps {
                automatic: true,
                ..OptionCaps::default()
            },
            ..option(
                name,
                title,
                Unit::Percent,
                OptionKind::Int(NumericConstraint::Range {
                    min: -100,
                    max: 100,
                    quant: 1,
                }),
            )
        };
        Some(match index {
            OPT_COUNT => OptionDescriptor {
                caps: OptionCaps::read_only(),
                ..option("", "Number of options", Unit::None, OptionKind::Int(NumericConstraint::None))
            },
            1 => group("Scan Mode"),
            OPT_MODE => OptionDescriptor {
                size: 32,
                ..option(
                    "mode",
                    "Scan mode",
                    Unit::None,
                    OptionKind::String {
                        choices: Some(self.modes()),
                    },
                )
            },
            OPT_DEPTH => option(
                "depth",
                "Bit depth",
                Unit::Bit,
                OptionKind::Int(NumericConstraint::WordList(vec![1, 8, 16])),
            ),
            OPT_RESOLUTION => option(
                "resolution",
                "Scan resolution",
                Unit::Dpi,
                OptionKind::Int(self.resolution()),
            ),
            5 => option("preview", "Preview", Unit::None, OptionKind::Bool),
            OPT_THREE_PASS => option("three-pass", "Three-pass simulation", Unit::None, OptionKind::Bool),
            OPT_HAND_SCANNER => option(
                "hand-scanner",
                "Hand-scanner simulation",
                Unit::None,
                OptionKind::Bool,
            ),
            8 => group("Geometry"),
            OPT_TL_X => geometry("tl-x", "Top-left x", width),
            OPT_TL_Y => geometry("tl-y", "Top-left y", height),
            OPT_BR_X => geometry("br-x", "Bottom-right x", width),
            OPT_BR_Y => geometry("br-y", "Bottom-right y", height),
            13 => group("Enhancement"),
            14 => percent("brightness", "Brightness"),
            15 => percent("contrast", "Contrast"),
            _ => return None,
        })
    }

    fn defaults(self) -> Vec<OptionValue> {
        let (width, height) = self.bed();
        vec![
            OptionValue::Word(NUM_OPTIONS as i32),
            OptionValue::Button,
            OptionValue::Text("Gray".into()),
            OptionValue::Word(8),
            OptionValue::Word(75),
            OptionValue::Bool(false),
            OptionValue::Bool(false),
            OptionValue::Bool(false),
            OptionValue::Button,
            OptionValue::Word(0),
            OptionValue::Word(0),
            OptionValue::Word(sane_fix(width)),
            OptionValue::Word(sane_fix(height)),
            OptionValue::Button,
            OptionValue::Word(0),
            OptionValue::Word(0),
        ]
    }
}

fn option(name: &str, title: &str, unit: Unit, kind: OptionKind) -> OptionDescriptor {
    OptionDescriptor {
        name: name.into(),
        title: title.into(),
        desc: String::new(),
        unit,
        size: 4,
        caps: OptionCaps::default(),
        kind,
    }
}

fn group(title: &str) -> OptionDescriptor {
    OptionDescriptor {
        caps: OptionCaps {
            settable: false,
            gettable: false,
            ..OptionCaps::default()
        },
        size: 0,
        ..option("", title, Unit::None, OptionKind::Group)
    }
}

/// One acquisition in progress.
#[derive(Debug)]
struct ScanProgress {
    frames: Vec<FrameFormat>,
    frame: usize,
    params: Parameters,
    /// Real line count, also when the reported one is unknown.
    lines: usize,
    sent: usize,
    frame_done: bool,
}

#[derive(Debug)]
struct OpenDevice {
    model: SimulatedModel,
    values: Vec<OptionValue>,
    scan: Option<ScanProgress>,
}

impl OpenDevice {
    fn text(&self, index: usize) -> &str {
        self.values[index].as_text().unwrap_or_default()
    }

    fn word(&self, index: usize) -> i32 {
        self.values[index].as_word().unwrap_or_default()
    }

    fn flag(&self, index: usize) -> bool {
        matches!(self.values[index], OptionValue::Bool(true))
    }

    fn is_active(&self, index: usize) -> bool {
        match index {
            OPT_DEPTH => self.text(OPT_MODE) != "Lineart",
            OPT_THREE_PASS => self.text(OPT_MODE) == "Color",
            _ => true,
        }
    }

    fn descriptor(&self, index: usize) -> Option<OptionDescriptor> {
        let mut desc = self.model.descriptor(index)?;
        desc.caps.active = self.is_active(index);
        Some(desc)
    }

    /// Frame formats and sample depth for the current settings.
    fn frame_plan(&self) -> (Vec<FrameFormat>, u32) {
        let depth = self.word(OPT_DEPTH) as u32;
        match self.text(OPT_MODE) {
            "Lineart" => (vec![FrameFormat::Gray], 1),
            "Color" if self.flag(OPT_THREE_PASS) => (
                vec![FrameFormat::Red, FrameFormat::Green, FrameFormat::Blue],
                depth,
            ),
            "Color" => (vec![FrameFormat::Rgb], depth),
            _ => (vec![FrameFormat::Gray], depth),
        }
    }

    fn parameters(&self, format: FrameFormat, depth: u32, last_frame: bool) -> (Parameters, usize) {
        let dpi = self.word(OPT_RESOLUTION).max(1) as f64;
        let extent = |near: usize, far: usize| {
            let mm = sane_unfix(self.word(far) - self.word(near)).max(0.0);
            ((mm / 25.4 * dpi).round() as usize).max(1)
        };
        let pixels_per_line = extent(OPT_TL_X, OPT_BR_X);
        let lines = extent(OPT_TL_Y, OPT_BR_Y);
        let samples = if format == FrameFormat::Rgb { 3 } else { 1 };
        let bytes_per_line = (pixels_per_line * samples * depth as usize).div_ceil(8);
        let reported = if self.flag(OPT_HAND_SCANNER) {
            -1
        } else {
            lines as i32
        };
        (
            Parameters {
                format,
                last_frame,
                bytes_per_line,
                pixels_per_line,
                lines: reported,
                depth,
            },
            lines,
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    models: Vec<SimulatedModel>,
    open: HashMap<u32, OpenDevice>,
    next_handle: u32,
    credentials: Option<(String, String)>,
    scan_failure: Option<BackendStatus>,
    calls: usize,
    region_inverted: bool,
}

impl Inner {
    fn device(&self, handle: HandleId) -> Result<&OpenDevice, BackendError> {
        self.open
            .get(&handle.0)
            .ok_or_else(|| BackendError::new(BackendStatus::Inval))
    }

    fn device_mut(&mut self, handle: HandleId) -> Result<&mut OpenDevice, BackendError> {
        self.open
            .get_mut(&handle.0)
            .ok_or_else(|| BackendError::new(BackendStatus::Inval))
    }
}

/// In-process backend with deterministic behaviour.
///
/// Cloning yields another handle onto the same simulated hardware, so a
/// test can keep one to inspect call counts after handing the other over.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedBackend {
    /// Flatbed followed by the network feeder.
    pub fn new() -> Self {
        Self::with_models(&[SimulatedModel::Flatbed, SimulatedModel::Feeder])
    }

    pub fn with_models(models: &[SimulatedModel]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                models: models.to_vec(),
                next_handle: 1,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse opens until these credentials are presented. The password is
    /// expected in its `$MD5$` challenge form.
    pub fn require_credentials(&self, username: &str, password: &str) {
        self.lock().credentials = Some((username.into(), password.into()));
    }

    /// Make every `start` fail with `status`; `None` clears it.
    pub fn fail_scans(&self, status: Option<BackendStatus>) {
        self.lock().scan_failure = status;
    }

    /// Total number of backend calls made so far.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    pub fn open_handle_count(&self) -> usize {
        self.lock().open.len()
    }

    /// Whether a geometry set ever left the top-left corner past the
    /// bottom-right one.
    pub fn region_was_inverted(&self) -> bool {
        self.lock().region_inverted
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SimulatedBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        Ok(inner.models.iter().map(|m| m.info()).collect())
    }

    fn open(
        &self,
        name: &str,
        credentials: Option<&Credentials>,
    ) -> Result<HandleId, BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        let model = inner
            .models
            .iter()
            .copied()
            .find(|m| m.info().name == name)
            .ok_or_else(|| BackendError::with_context(BackendStatus::Inval, name))?;

        if let Some((user, password)) = &inner.credentials {
            let resource = format!("{name}$MD5${CHALLENGE}");
            let expected = Credentials::for_resource(&resource, user, password);
            if credentials != Some(&expected) {
                return Err(BackendError::with_context(
                    BackendStatus::AccessDenied,
                    resource,
                ));
            }
        }

        let id = inner.next_handle;
        inner.next_handle += 1;
        inner.open.insert(
            id,
            OpenDevice {
                model,
                values: model.defaults(),
                scan: None,
            },
        );
        Ok(HandleId(id))
    }

    fn close(&self, handle: HandleId) {
        let mut inner = self.lock();
        inner.calls += 1;
        inner.open.remove(&handle.0);
    }

    fn option_descriptor(&self, handle: HandleId, index: usize) -> Option<OptionDescriptor> {
        let mut inner = self.lock();
        inner.calls += 1;
        inner.device(handle).ok()?.descriptor(index)
    }

    fn get_option(&self, handle: HandleId, index: usize) -> Result<OptionValue, BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        let dev = inner.device(handle)?;
        let desc = dev
            .descriptor(index)
            .ok_or_else(|| BackendError::new(BackendStatus::Inval))?;
        if !desc.caps.active || !desc.caps.gettable {
            return Err(BackendError::new(BackendStatus::Inval));
        }
        Ok(dev.values[index].clone())
    }

    fn set_option(
        &self,
        handle: HandleId,
        index: usize,
        value: OptionValue,
    ) -> Result<(OptionValue, SetInfo), BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        let dev = inner.device_mut(handle)?;
        let desc = dev
            .descriptor(index)
            .ok_or_else(|| BackendError::new(BackendStatus::Inval))?;
        if !desc.caps.active || !desc.caps.settable {
            return Err(BackendError::new(BackendStatus::Inval));
        }
        let (applied, inexact) = constrain_value(&desc, value)?;
        dev.values[index] = applied.clone();

        let mut info = SetInfo {
            inexact,
            ..SetInfo::default()
        };
        match index {
            OPT_MODE | OPT_THREE_PASS => {
                info.reload_options = true;
                info.reload_params = true;
            }
            OPT_DEPTH | OPT_RESOLUTION | OPT_HAND_SCANNER => info.reload_params = true,
            OPT_TL_X | OPT_TL_Y | OPT_BR_X | OPT_BR_Y => {
                info.reload_params = true;
                let inverted = dev.word(OPT_TL_X) > dev.word(OPT_BR_X)
                    || dev.word(OPT_TL_Y) > dev.word(OPT_BR_Y);
                inner.region_inverted |= inverted;
            }
            _ => {}
        }
        Ok((applied, info))
    }

    fn set_auto(&self, handle: HandleId, index: usize) -> Result<SetInfo, BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        let dev = inner.device_mut(handle)?;
        match dev.descriptor(index) {
            Some(desc) if desc.caps.automatic && desc.caps.active => {
                dev.values[index] = dev.model.defaults()[index].clone();
                Ok(SetInfo::default())
            }
            Some(_) => Err(BackendError::new(BackendStatus::Unsupported)),
            None => Err(BackendError::new(BackendStatus::Inval)),
        }
    }

    fn start(&self, handle: HandleId) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        if let Some(status) = inner.scan_failure {
            return Err(BackendError::new(status));
        }
        let dev = inner.device_mut(handle)?;

        let next_frame = match &dev.scan {
            Some(scan) if !scan.frame_done => return Err(BackendError::new(BackendStatus::DeviceBusy)),
            Some(scan) if scan.frame + 1 < scan.frames.len() => Some(scan.frame + 1),
            _ => None,
        };
        let (frames, depth) = match (&dev.scan, next_frame) {
            (Some(scan), Some(_)) => (scan.frames.clone(), scan.params.depth),
            _ => dev.frame_plan(),
        };
        let frame = next_frame.unwrap_or(0);
        let (params, lines) = dev.parameters(frames[frame], depth, frame + 1 == frames.len());
        dev.scan = Some(ScanProgress {
            frames,
            frame,
            params,
            lines,
            sent: 0,
            frame_done: false,
        });
        Ok(())
    }

    fn parameters(&self, handle: HandleId) -> Result<Parameters, BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        let dev = inner.device(handle)?;
        match &dev.scan {
            Some(scan) => Ok(scan.params),
            None => {
                let (frames, depth) = dev.frame_plan();
                Ok(dev.parameters(frames[0], depth, frames.len() == 1).0)
            }
        }
    }

    fn read(&self, handle: HandleId, buf: &mut [u8]) -> Result<Option<usize>, BackendError> {
        let mut inner = self.lock();
        inner.calls += 1;
        let dev = inner.device_mut(handle)?;
        let scan = dev
            .scan
            .as_mut()
            .filter(|s| !s.frame_done)
            .ok_or_else(|| BackendError::new(BackendStatus::Inval))?;

        let total = scan.params.bytes_per_line * scan.lines;
        let n = buf.len().min(total - scan.sent);
        if n == 0 {
            scan.frame_done = true;
            return Ok(None);
        }
        let bpl = scan.params.bytes_per_line;
        for (i, byte) in buf[..n].iter_mut().enumerate() {
            let offset = scan.sent + i;
            let (line, col) = (offset / bpl, offset % bpl);
            *byte = (line * 7 + col * 3 + scan.frame * 50) as u8;
        }
        scan.sent += n;
        Ok(Some(n))
    }

    fn cancel(&self, handle: HandleId) {
        let mut inner = self.lock();
        inner.calls += 1;
        if let Ok(dev) = inner.device_mut(handle) {
            dev.scan = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_flatbed(backend: &SimulatedBackend) -> HandleId {
        backend.open("sim:flatbed", None).unwrap()
    }

    fn read_frame(backend: &SimulatedBackend, handle: HandleId) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        while let Some(n) = backend.read(handle, &mut buf).unwrap() {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_option_list_ends_with_none() {
        let backend = SimulatedBackend::new();
        let h = open_flatbed(&backend);
        let names: Vec<_> = (1..)
            .map_while(|i| backend.option_descriptor(h, i))
            .map(|d| d.name)
            .collect();
        assert_eq!(names.len(), NUM_OPTIONS - 1);
        assert!(names.contains(&"br-y".to_string()));
    }

    #[test]
    fn test_mode_change_requests_reload() {
        let backend = SimulatedBackend::new();
        let h = open_flatbed(&backend);
        let (value, info) = backend
            .set_option(h, OPT_MODE, OptionValue::Text("line".into()))
            .unwrap();
        assert_eq!(value, OptionValue::Text("Lineart".into()));
        assert!(info.reload_options);
        assert!(!backend.option_descriptor(h, OPT_DEPTH).unwrap().caps.active);
        assert!(backend.get_option(h, OPT_DEPTH).is_err());
    }

    #[test]
    fn test_gray_frame_size_matches_parameters() {
        let backend = SimulatedBackend::new();
        let h = open_flatbed(&backend);
        backend.start(h).unwrap();
        let p = backend.parameters(h).unwrap();
        assert_eq!(p.format, FrameFormat::Gray);
        assert!(p.last_frame);
        let data = read_frame(&backend, h);
        assert_eq!(data.len(), p.bytes_per_line * p.lines as usize);
    }

    #[test]
    fn test_three_pass_color() {
        let backend = SimulatedBackend::new();
        let h = open_flatbed(&backend);
        backend
            .set_option(h, OPT_MODE, OptionValue::Text("Color".into()))
            .unwrap();
        backend
            .set_option(h, OPT_THREE_PASS, OptionValue::Bool(true))
            .unwrap();
        let mut formats = Vec::new();
        loop {
            backend.start(h).unwrap();
            let p = backend.parameters(h).unwrap();
            formats.push(p.format);
            read_frame(&backend, h);
            if p.last_frame {
                break;
            }
        }
        assert_eq!(
            formats,
            vec![FrameFormat::Red, FrameFormat::Green, FrameFormat::Blue]
        );
    }

    #[test]
    fn test_access_denied_names_resource() {
        let backend = SimulatedBackend::new();
        backend.require_credentials("scan", "secret");
        let err = backend.open("sim:flatbed", None).unwrap_err();
        assert!(err.is_access_denied());
        let resource = err.context.unwrap();
        assert!(resource.starts_with("sim:flatbed$MD5$"));

        let good = Credentials::for_resource(&resource, "scan", "secret");
        assert!(backend.open("sim:flatbed", Some(&good)).is_ok());
        assert_eq!(backend.open_handle_count(), 1);
    }

    #[test]
    fn test_scan_failure_injection() {
        let backend = SimulatedBackend::new();
        let h = open_flatbed(&backend);
        backend.fail_scans(Some(BackendStatus::Jammed));
        assert_eq!(backend.start(h).unwrap_err().status, BackendStatus::Jammed);
    }
}
