//! Acquisition pipeline.
//!
//! - `buffer`: constant-increment scan buffer
//! - `image`: frame assembly and chunked delivery

pub mod buffer;
pub mod image;

pub use buffer::Buffer;
pub use image::{Image, ImageKind, RawScan};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendError, BackendStatus, HandleId, Parameters};
use crate::error::TwainError;
use crate::events::{SourceEvent, SourceObserver};
use crate::protocol::Fix32;
use crate::session::DeviceSession;

/// Cooperative cancellation flag, polled before each frame and each read.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn check(&self) -> Result<(), TwainError> {
        if self.is_cancelled() {
            Err(BackendError::new(BackendStatus::Cancelled).into())
        } else {
            Ok(())
        }
    }
}

/// Settings of one acquisition.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest {
    pub x_resolution: Fix32,
    pub y_resolution: Fix32,
    /// Assumed document length when the backend reports none.
    pub default_length_mm: f64,
    /// Bytes asked for per backend read.
    pub chunk_size: usize,
    /// Emit per-frame progress events.
    pub indicators: bool,
}

impl ScanRequest {
    /// Initial buffer size for a scan starting with `params`.
    fn initial_size(&self, params: &Parameters) -> usize {
        let lines = usize::try_from(params.lines).unwrap_or_else(|_| {
            (self.default_length_mm / 25.4 * self.y_resolution.to_f64()).ceil() as usize
        });
        let passes = if params.format.is_plane() { 3 } else { 1 };
        params.bytes_per_line * lines.max(1) * passes
    }
}

/// Run one scan on the active device and assemble the result.
///
/// The backend acquisition is always ended, also when reading fails or
/// is cancelled.
#[instrument(skip_all)]
pub fn acquire<B: Backend, O: SourceObserver>(
    devices: &DeviceSession<B>,
    request: &ScanRequest,
    cancel: &CancelToken,
    observer: &O,
) -> Result<Image, TwainError> {
    let handle = devices.handle()?;
    let backend = devices.backend();
    let result = read_frames(backend, handle, request, cancel, observer);
    backend.cancel(handle);

    let raw = result.inspect_err(|e| warn!(error = %e, "Scan aborted"))?;
    let image = Image::assemble(raw, request.x_resolution, request.y_resolution)?;
    info!(
        width = image.width(),
        lines = image.lines(),
        kind = ?image.kind(),
        "Scan complete"
    );
    Ok(image)
}

fn read_frames<B: Backend, O: SourceObserver>(
    backend: &B,
    handle: HandleId,
    request: &ScanRequest,
    cancel: &CancelToken,
    observer: &O,
) -> Result<RawScan, TwainError> {
    let chunk = request.chunk_size.max(1);
    let mut passes = HashMap::new();
    let mut offsets = Vec::new();

    cancel.check()?;
    backend.start(handle)?;
    let mut params = backend.parameters(handle)?;
    let mut buffer = Buffer::new(request.initial_size(&params))?;

    loop {
        debug!(format = ?params.format, lines = params.lines, "Reading frame");
        passes.insert(params.format, offsets.len());
        offsets.push(buffer.len());

        loop {
            cancel.check()?;
            let space = buffer.reserve(chunk)?;
            match backend.read(handle, &mut space[..chunk])? {
                Some(n) => buffer.release(n),
                None => break,
            }
        }

        if request.indicators {
            observer.on_event(&SourceEvent::Progress {
                frame: offsets.len(),
                bytes: buffer.len(),
            });
        }
        if params.last_frame {
            break;
        }

        cancel.check()?;
        backend.start(handle)?;
        params = backend.parameters(handle)?;
    }

    Ok(RawScan {
        params,
        passes,
        offsets,
        data: buffer.claim(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{OptionValue, SimulatedBackend};
    use crate::events::NullObserver;
    use crate::session::NoAuthenticator;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Frames(Mutex<Vec<usize>>);

    impl SourceObserver for Frames {
        fn on_event(&self, event: &SourceEvent) {
            if let SourceEvent::Progress { frame, .. } = event {
                self.0.lock().unwrap().push(*frame);
            }
        }
    }

    fn request() -> ScanRequest {
        ScanRequest {
            x_resolution: Fix32::from_int(75),
            y_resolution: Fix32::from_int(75),
            default_length_mm: 355.6,
            chunk_size: 1000,
            indicators: true,
        }
    }

    fn session() -> (SimulatedBackend, DeviceSession<SimulatedBackend>) {
        let backend = SimulatedBackend::new();
        let mut devices = DeviceSession::new(backend.clone());
        devices.open(0, &NoAuthenticator).unwrap();
        (backend, devices)
    }

    fn set(devices: &mut DeviceSession<SimulatedBackend>, name: &str, value: OptionValue) {
        let index = devices.options().find(name).unwrap();
        devices.set(index, value).unwrap();
    }

    #[test]
    fn test_gray_scan() {
        let (_, devices) = session();
        let image = acquire(&devices, &request(), &CancelToken::new(), &NullObserver).unwrap();
        assert_eq!(image.kind(), ImageKind::Gray);
        // 215.9 mm x 297 mm at 75 dpi
        assert_eq!(image.width(), 637);
        assert_eq!(image.lines(), 877);
        assert_eq!(image.data()[1], 3);
    }

    #[test]
    fn test_three_pass_colour() {
        let (_, mut devices) = session();
        set(&mut devices, "mode", OptionValue::Text("Color".into()));
        set(&mut devices, "three-pass", OptionValue::Bool(true));
        let frames = Frames::default();
        let image = acquire(&devices, &request(), &CancelToken::new(), &frames).unwrap();
        assert_eq!(image.kind(), ImageKind::Rgb);
        assert_eq!(*frames.0.lock().unwrap(), vec![1, 2, 3]);
        // red pass 0, green pass 1, blue pass 2
        assert_eq!(&image.data()[..3], &[0, 50, 100]);
    }

    #[test]
    fn test_unknown_length() {
        let (_, mut devices) = session();
        set(&mut devices, "hand-scanner", OptionValue::Bool(true));
        let image = acquire(&devices, &request(), &CancelToken::new(), &NullObserver).unwrap();
        assert_eq!(image.lines(), 877);
    }

    #[test]
    fn test_cancel_before_read() {
        let (backend, devices) = session();
        let cancel = CancelToken::new();
        cancel.cancel();
        let before = backend.call_count();
        let err = acquire(&devices, &request(), &cancel, &NullObserver).unwrap_err();
        assert!(matches!(&err, TwainError::BackendFailure(e) if e.is_cancelled()));
        // only the closing cancel reached the backend
        assert_eq!(backend.call_count(), before + 1);
    }

    /// Cancels the scan once the first frame is in.
    struct CancelAfterFirstFrame {
        cancel: CancelToken,
        backend: SimulatedBackend,
        calls_at_cancel: Mutex<Option<usize>>,
    }

    impl SourceObserver for CancelAfterFirstFrame {
        fn on_event(&self, event: &SourceEvent) {
            if let SourceEvent::Progress { frame: 1, .. } = event {
                self.cancel.cancel();
                *self.calls_at_cancel.lock().unwrap() = Some(self.backend.call_count());
            }
        }
    }

    #[test]
    fn test_cancel_between_frames() {
        let (backend, mut devices) = session();
        set(&mut devices, "mode", OptionValue::Text("Color".into()));
        set(&mut devices, "three-pass", OptionValue::Bool(true));
        let observer = CancelAfterFirstFrame {
            cancel: CancelToken::new(),
            backend: backend.clone(),
            calls_at_cancel: Mutex::new(None),
        };
        let err = acquire(&devices, &request(), &observer.cancel, &observer).unwrap_err();
        assert!(matches!(&err, TwainError::BackendFailure(e) if e.is_cancelled()));
        assert!(!err.is_alertable());
        // no start or read for the green pass, only the closing cancel
        let at_cancel = observer.calls_at_cancel.lock().unwrap().unwrap();
        assert_eq!(backend.call_count(), at_cancel + 1);
    }

    #[test]
    fn test_backend_failure_ends_scan() {
        let (backend, devices) = session();
        backend.fail_scans(Some(BackendStatus::Jammed));
        let err = acquire(&devices, &request(), &CancelToken::new(), &NullObserver).unwrap_err();
        assert!(err.is_alertable());
        backend.fail_scans(None);
        assert!(acquire(&devices, &request(), &CancelToken::new(), &NullObserver).is_ok());
    }

    #[test]
    fn test_initial_size_from_default_length() {
        let params = Parameters {
            format: crate::backend::FrameFormat::Gray,
            last_frame: true,
            bytes_per_line: 100,
            pixels_per_line: 100,
            lines: -1,
            depth: 8,
        };
        let req = ScanRequest {
            default_length_mm: 254.0,
            ..request()
        };
        assert_eq!(req.initial_size(&params), 100 * 750);
    }
}
