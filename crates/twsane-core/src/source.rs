//! Data source - the host-facing orchestrator.
//!
//! Owns the device session, the protocol state and the presentation
//! hooks, and exposes the single entry point a TWAIN host calls.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::acquire::CancelToken;
use crate::backend::{Backend, OptionValue, SetInfo};
use crate::capability::ScanRegion;
use crate::config::SourceConfig;
use crate::error::TwainError;
use crate::events::{SourceEvent, SourceObserver, TracingObserver};
use crate::protocol::{Identity, Payload, ReturnCode};
use crate::session::{
    Authenticator, DeviceSession, MemoryStore, NoAuthenticator, PreferenceStore, TomlFileStore,
};
use crate::state::handlers::{self, HandlerContext, dispatch};
use crate::state::{SessionState, TwainState};

/// One loaded data source.
pub struct DataSource<B: Backend, O: SourceObserver> {
    devices: DeviceSession<B>,
    session: SessionState,
    observer: Arc<O>,
    authenticator: Box<dyn Authenticator>,
    store: Box<dyn PreferenceStore>,
    config: SourceConfig,
    cancel: CancelToken,
    /// Product name of the host that called last.
    host: String,
}

impl<B: Backend> DataSource<B, TracingObserver> {
    /// Create a data source with the default tracing observer.
    pub fn new(backend: B, config: SourceConfig) -> Self {
        Self::with_observer(backend, config, Arc::new(TracingObserver))
    }
}

impl<B: Backend, O: SourceObserver> DataSource<B, O> {
    /// Create a data source with a custom observer.
    pub fn with_observer(backend: B, config: SourceConfig, observer: Arc<O>) -> Self {
        let store: Box<dyn PreferenceStore> = match &config.preferences_path {
            Some(path) => Box::new(TomlFileStore::new(path)),
            None => Box::new(MemoryStore::default()),
        };
        Self {
            devices: DeviceSession::new(backend),
            session: SessionState::new(),
            observer,
            authenticator: Box::new(NoAuthenticator),
            store,
            config,
            cancel: CancelToken::new(),
            host: String::new(),
        }
    }

    /// Use `authenticator` to answer credential requests.
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Box::new(authenticator);
        self
    }

    pub fn with_store(mut self, store: impl PreferenceStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    fn context(&mut self) -> HandlerContext<'_, B, O> {
        HandlerContext {
            devices: &mut self.devices,
            state: &mut self.session,
            observer: &*self.observer,
            authenticator: &*self.authenticator,
            store: &*self.store,
            config: &self.config,
            cancel: &self.cancel,
            origin: &self.host,
        }
    }

    /// The data source entry point.
    ///
    /// Never fails as a Rust call: errors become [`ReturnCode::Failure`]
    /// and their condition code is kept for the next `Status Get`.
    #[instrument(skip(self, origin, payload), fields(host = %origin.product_name))]
    pub fn entry(
        &mut self,
        origin: &Identity,
        dg: u32,
        dat: u16,
        msg: u16,
        payload: &mut Payload,
    ) -> ReturnCode {
        self.host.clone_from(&origin.product_name);
        let result = dispatch(&mut self.context(), dg, dat, msg, payload);
        match result {
            Ok(result) => result.into(),
            Err(e) => {
                let condition = e.condition_code();
                warn!(error = %e, condition, "Call failed");
                self.session.latch(condition);
                ReturnCode::Failure
            }
        }
    }

    /// Scan from the UI. On success the host should be told a transfer is
    /// ready; the observer receives `TransferReady`.
    #[instrument(skip(self))]
    pub fn scan(&mut self) -> Result<(), TwainError> {
        self.session
            .require(&(TwainState::Enabled..=TwainState::Enabled), "Scan")?;
        handlers::scan_from_ui(&mut self.context())
    }

    /// The user closed the UI.
    pub fn request_close(&mut self) -> Result<(), TwainError> {
        self.session.require(
            &(TwainState::Enabled..=TwainState::Transferring),
            "Close request",
        )?;
        info!("Close requested by the user");
        self.observer.on_event(&SourceEvent::CloseRequested);
        Ok(())
    }

    /// Switch to device `index`, saving the settings of the current one.
    #[instrument(skip(self))]
    pub fn select_device(&mut self, index: usize) -> Result<(), TwainError> {
        self.session
            .require(&(TwainState::Open..=TwainState::Enabled), "Device selection")?;
        if index >= self.devices.known_devices().len() {
            return Err(TwainError::NoDevice);
        }
        handlers::switch_device(&mut self.context(), index)
    }

    /// Set a backend option from the UI.
    pub fn set_option(
        &mut self,
        index: usize,
        value: OptionValue,
    ) -> Result<(OptionValue, SetInfo), TwainError> {
        self.session
            .require(&(TwainState::Open..=TwainState::Enabled), "Option change")?;
        let (applied, info) = self.devices.set(index, value)?;
        self.option_changed(index, info);
        Ok((applied, info))
    }

    /// Hand an option over to the backend's automatic setting.
    pub fn set_option_auto(&mut self, index: usize) -> Result<SetInfo, TwainError> {
        self.session
            .require(&(TwainState::Open..=TwainState::Enabled), "Option change")?;
        let info = self.devices.set_auto(index)?;
        self.option_changed(index, info);
        Ok(info)
    }

    fn option_changed(&self, index: usize, info: SetInfo) {
        let event = if info.reload_options {
            SourceEvent::OptionsRebuilt
        } else {
            let name = self
                .devices
                .options()
                .descriptor(index)
                .map(|d| d.name.clone())
                .unwrap_or_default();
            SourceEvent::OptionRefreshed { index, name }
        };
        self.observer.on_event(&event);
    }

    /// Size of the current scan area, for area preset menus.
    pub fn region_label(&self) -> Result<String, TwainError> {
        Ok(ScanRegion::read(&self.devices)?.label())
    }

    /// Token that cancels a running scan when triggered.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TwainState {
        self.session.state
    }

    pub fn pending_count(&self) -> usize {
        self.session.queue.len()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn backend(&self) -> &B {
        self.devices.backend()
    }

    pub fn devices(&self) -> &DeviceSession<B> {
        &self.devices
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl<B: Backend, O: SourceObserver> Drop for DataSource<B, O> {
    fn drop(&mut self) {
        self.devices.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendStatus, Credentials, SimulatedBackend, SimulatedModel};
    use crate::events::AlertKind;
    use crate::protocol::constants::*;
    use crate::protocol::{
        Capability, Container, Fix32, Frame, ImageLayout, ImageMemXfer, Item, PendingXfers, SetupMemXfer,
        Status, UserInterface,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<SourceEvent>>,
        ui: bool,
        /// Triggered on the first progress event.
        cancel_on_progress: Mutex<Option<CancelToken>>,
    }

    impl RecordingObserver {
        fn with_ui() -> Self {
            Self {
                ui: true,
                ..Self::default()
            }
        }

        fn events(&self) -> Vec<SourceEvent> {
            self.events.lock().unwrap().clone()
        }

        fn alerts(&self) -> Vec<AlertKind> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    SourceEvent::Alert { kind, .. } => Some(kind),
                    _ => None,
                })
                .collect()
        }
    }

    impl SourceObserver for RecordingObserver {
        fn on_event(&self, event: &SourceEvent) {
            if let SourceEvent::Progress { .. } = event {
                if let Some(cancel) = self.cancel_on_progress.lock().unwrap().as_ref() {
                    cancel.cancel();
                }
            }
            self.events.lock().unwrap().push(event.clone());
        }

        fn presents_ui(&self) -> bool {
            self.ui
        }
    }

    type Source = DataSource<SimulatedBackend, RecordingObserver>;

    fn source_with(backend: SimulatedBackend, observer: RecordingObserver) -> Source {
        DataSource::with_observer(backend, SourceConfig::default(), Arc::new(observer))
    }

    fn source() -> (SimulatedBackend, Source) {
        let backend = SimulatedBackend::new();
        (backend.clone(), source_with(backend, RecordingObserver::default()))
    }

    fn call_as(ds: &mut Source, host: &str, dg: u32, dat: u16, msg: u16, p: &mut Payload) -> ReturnCode {
        ds.entry(&Identity::application(host), dg, dat, msg, p)
    }

    fn call(ds: &mut Source, dg: u32, dat: u16, msg: u16, p: &mut Payload) -> ReturnCode {
        call_as(ds, "Test Host", dg, dat, msg, p)
    }

    fn open_as(ds: &mut Source, host: &str) -> ReturnCode {
        let mut id = Payload::Identity(Identity {
            id: 7,
            ..Identity::application("")
        });
        call_as(ds, host, DG_CONTROL, DAT_IDENTITY, MSG_OPENDS, &mut id)
    }

    fn open(ds: &mut Source) -> ReturnCode {
        open_as(ds, "Test Host")
    }

    fn enable(ds: &mut Source, show_ui: bool) -> ReturnCode {
        let mut ui = Payload::UserInterface(UserInterface {
            show_ui,
            modal_ui: false,
        });
        call(ds, DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDS, &mut ui)
    }

    fn status(ds: &mut Source) -> u16 {
        let mut p = Payload::Status(Status::default());
        assert_eq!(call(ds, DG_CONTROL, DAT_STATUS, MSG_GET, &mut p), ReturnCode::Success);
        match p {
            Payload::Status(s) => s.condition_code,
            _ => unreachable!(),
        }
    }

    fn pending(ds: &mut Source, msg: u16) -> (ReturnCode, u16) {
        let mut p = Payload::PendingXfers(PendingXfers::default());
        let rc = call(ds, DG_CONTROL, DAT_PENDINGXFERS, msg, &mut p);
        match p {
            Payload::PendingXfers(p) => (rc, p.count),
            _ => unreachable!(),
        }
    }

    fn cap(ds: &mut Source, msg: u16, cap: Capability) -> (ReturnCode, Capability) {
        let mut p = Payload::Capability(cap);
        let rc = call(ds, DG_CONTROL, DAT_CAPABILITY, msg, &mut p);
        match p {
            Payload::Capability(c) => (rc, c),
            _ => unreachable!(),
        }
    }

    fn layout(ds: &mut Source, msg: u16, frame: Frame) -> (ReturnCode, Frame) {
        let mut p = Payload::ImageLayout(ImageLayout {
            frame,
            ..ImageLayout::default()
        });
        let rc = call(ds, DG_IMAGE, DAT_IMAGELAYOUT, msg, &mut p);
        match p {
            Payload::ImageLayout(l) => (rc, l.frame),
            _ => unreachable!(),
        }
    }

    fn inches(left: f64, top: f64, right: f64, bottom: f64) -> Frame {
        Frame {
            left: Fix32::from_f64(left),
            top: Fix32::from_f64(top),
            right: Fix32::from_f64(right),
            bottom: Fix32::from_f64(bottom),
        }
    }

    #[test]
    fn test_calls_outside_window_never_reach_backend() {
        let (backend, mut ds) = source();
        let before = backend.call_count();
        for msg in [MSG_GET, MSG_GETCURRENT, MSG_GETDEFAULT] {
            let (rc, _) = cap(&mut ds, msg, Capability::request(ICAP_XRESOLUTION));
            assert_eq!(rc, ReturnCode::Failure);
        }
        assert_eq!(backend.call_count(), before);

        assert_eq!(open(&mut ds), ReturnCode::Success);
        assert_eq!(enable(&mut ds, false), ReturnCode::Success);
        let before = backend.call_count();
        let set = Capability::with_value(ICAP_XRESOLUTION, Item::Fix32(Fix32::from_int(300)));
        assert_eq!(cap(&mut ds, MSG_SET, set).0, ReturnCode::Failure);
        assert_eq!(cap(&mut ds, MSG_RESET, Capability::request(ICAP_BRIGHTNESS)).0, ReturnCode::Failure);
        assert_eq!(backend.call_count(), before);
        assert_eq!(status(&mut ds), TWCC_SEQERROR);
    }

    #[test]
    fn test_headless_enable_transfers_one_image() {
        let (_, mut ds) = source();
        assert_eq!(open(&mut ds), ReturnCode::Success);
        assert_eq!(ds.state(), TwainState::Open);

        assert_eq!(enable(&mut ds, false), ReturnCode::Success);
        assert_eq!(ds.state(), TwainState::TransferReady);
        assert!(ds.observer().events().contains(&SourceEvent::TransferReady { pending: 1 }));
        assert!(!ds.observer().events().iter().any(|e| matches!(e, SourceEvent::UiShown { .. })));
        assert_eq!(pending(&mut ds, MSG_GET), (ReturnCode::Success, 1));

        let mut info = Payload::ImageInfo(Default::default());
        assert_eq!(call(&mut ds, DG_IMAGE, DAT_IMAGEINFO, MSG_GET, &mut info), ReturnCode::Success);
        let Payload::ImageInfo(info) = info else { unreachable!() };
        assert_eq!(info.image_width, 637);
        assert_eq!(info.pixel_type, TWPT_GRAY as i16);

        let mut native = Payload::ImageNativeXfer(None);
        let rc = call(&mut ds, DG_IMAGE, DAT_IMAGENATIVEXFER, MSG_GET, &mut native);
        assert_eq!(rc, ReturnCode::XferDone);
        assert_eq!(ds.state(), TwainState::Transferring);
        let Payload::ImageNativeXfer(Some(raster)) = native else { unreachable!() };
        assert_eq!(raster.height, 877);
        assert_eq!(raster.data.len(), raster.bytes_per_row as usize * 877);

        assert_eq!(pending(&mut ds, MSG_ENDXFER), (ReturnCode::Success, 0));
        assert_eq!(ds.state(), TwainState::Enabled);
    }

    #[test]
    fn test_memory_transfer_walk() {
        let (_, mut ds) = source();
        open(&mut ds);
        let mech = Capability::with_value(ICAP_XFERMECH, Item::UInt16(TWSX_MEMORY));
        assert_eq!(cap(&mut ds, MSG_SET, mech).0, ReturnCode::Success);

        let mut setup = Payload::SetupMemXfer(SetupMemXfer::default());
        call(&mut ds, DG_CONTROL, DAT_SETUPMEMXFER, MSG_GET, &mut setup);
        assert_eq!(setup, Payload::SetupMemXfer(SetupMemXfer::DONT_CARE));

        enable(&mut ds, false);
        call(&mut ds, DG_CONTROL, DAT_SETUPMEMXFER, MSG_GET, &mut setup);
        let Payload::SetupMemXfer(setup) = setup else { unreachable!() };
        let stride = setup.min_buf_size as usize;
        assert_eq!(stride, 640);

        let mut next_row = 0;
        let mut total = 0;
        loop {
            let mut p = Payload::ImageMemXfer(ImageMemXfer::with_capacity(stride * 100));
            let rc = call(&mut ds, DG_IMAGE, DAT_IMAGEMEMXFER, MSG_GET, &mut p);
            let Payload::ImageMemXfer(xfer) = p else { unreachable!() };
            assert_eq!(xfer.y_offset as usize, next_row);
            next_row += xfer.rows as usize;
            total += xfer.bytes_written as usize;
            assert_eq!(ds.state(), TwainState::Transferring);
            if rc == ReturnCode::XferDone {
                break;
            }
            assert_eq!(rc, ReturnCode::Success);
        }
        assert_eq!(next_row, 877);
        assert_eq!(total, stride * 877);

        // nothing is delivered twice
        let mut p = Payload::ImageMemXfer(ImageMemXfer::with_capacity(stride));
        assert_eq!(call(&mut ds, DG_IMAGE, DAT_IMAGEMEMXFER, MSG_GET, &mut p), ReturnCode::Failure);
        assert_eq!(status(&mut ds), TWCC_BADPROTOCOL);

        assert_eq!(pending(&mut ds, MSG_ENDXFER).1, 0);
        assert_eq!(ds.state(), TwainState::Enabled);
    }

    #[test]
    fn test_native_transfer_only_from_transfer_ready() {
        let (_, mut ds) = source();
        open(&mut ds);
        enable(&mut ds, false);
        let mut p = Payload::ImageMemXfer(ImageMemXfer::with_capacity(640));
        call(&mut ds, DG_IMAGE, DAT_IMAGEMEMXFER, MSG_GET, &mut p);
        let mut native = Payload::ImageNativeXfer(None);
        let rc = call(&mut ds, DG_IMAGE, DAT_IMAGENATIVEXFER, MSG_GET, &mut native);
        assert_eq!(rc, ReturnCode::Failure);
        assert_eq!(status(&mut ds), TWCC_SEQERROR);
    }

    #[test]
    fn test_pending_reset_discards_images() {
        let (_, mut ds) = source();
        open(&mut ds);
        enable(&mut ds, false);
        assert_eq!(pending(&mut ds, MSG_RESET), (ReturnCode::Success, 0));
        assert_eq!(ds.state(), TwainState::Enabled);
        assert_eq!(ds.pending_count(), 0);

        let mut ui = Payload::UserInterface(UserInterface::default());
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_USERINTERFACE, MSG_DISABLEDS, &mut ui), ReturnCode::Success);
        let mut id = Payload::Identity(Identity::default());
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_IDENTITY, MSG_CLOSEDS, &mut id), ReturnCode::Success);
        assert_eq!(ds.state(), TwainState::Closed);
        assert_eq!(ds.backend().open_handle_count(), 0);
    }

    struct WrongThenCancel(Arc<AtomicUsize>);

    impl Authenticator for WrongThenCancel {
        fn authenticate(&self, _resource: &str, _rejected: usize) -> Option<Credentials> {
            let attempt = self.0.fetch_add(1, Ordering::SeqCst);
            (attempt < 2).then(|| Credentials {
                username: "user".into(),
                password: "wrong".into(),
            })
        }
    }

    #[test]
    fn test_authentication_cancel_leaves_source_closed() {
        let backend = SimulatedBackend::new();
        backend.require_credentials("user", "secret");
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut ds = source_with(backend.clone(), RecordingObserver::with_ui())
            .with_authenticator(WrongThenCancel(attempts.clone()));

        let handles = backend.open_handle_count();
        assert_eq!(open(&mut ds), ReturnCode::Failure);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(ds.state(), TwainState::Closed);
        assert_eq!(backend.open_handle_count(), handles);
        assert_eq!(ds.devices().open_handle_count(), 0);
        // the user cancelled; nothing to alert
        assert!(ds.observer().alerts().is_empty());
    }

    #[test]
    fn test_missing_device_alert_respects_silent_callers() {
        let backend = SimulatedBackend::with_models(&[]);
        let mut ds = source_with(backend, RecordingObserver::with_ui());
        assert_eq!(open_as(&mut ds, "TWAIN Bridge"), ReturnCode::Failure);
        assert!(ds.observer().alerts().is_empty());

        assert_eq!(open_as(&mut ds, "Test Host"), ReturnCode::Failure);
        assert_eq!(ds.observer().alerts(), vec![AlertKind::DeviceUnavailable]);
        assert_eq!(ds.state(), TwainState::Closed);
    }

    #[test]
    fn test_headless_observer_gets_no_alert() {
        let backend = SimulatedBackend::new();
        backend.fail_scans(Some(BackendStatus::Jammed));
        let mut ds = source_with(backend, RecordingObserver::default());
        open(&mut ds);
        assert_eq!(enable(&mut ds, true), ReturnCode::Failure);
        assert_eq!(ds.state(), TwainState::Open);
        assert_eq!(status(&mut ds), TWCC_OPERATIONERROR);
        assert!(ds.observer().alerts().is_empty());
    }

    #[test]
    fn test_ui_scan_flow() {
        let backend = SimulatedBackend::new();
        let mut ds = source_with(backend.clone(), RecordingObserver::with_ui());
        open(&mut ds);
        assert_eq!(enable(&mut ds, true), ReturnCode::Success);
        assert_eq!(ds.state(), TwainState::Enabled);
        assert!(ds.observer().events().contains(&SourceEvent::UiShown { ui_only: false }));

        backend.fail_scans(Some(BackendStatus::Jammed));
        assert!(ds.scan().is_err());
        assert_eq!(ds.state(), TwainState::Enabled);
        assert_eq!(ds.observer().alerts(), vec![AlertKind::ScanFailed]);

        backend.fail_scans(None);
        ds.scan().unwrap();
        assert_eq!(ds.state(), TwainState::TransferReady);
        assert!(ds.observer().events().contains(&SourceEvent::TransferReady { pending: 1 }));

        // at most one acquisition at a time
        assert!(matches!(ds.scan(), Err(TwainError::ProtocolViolation { .. })));

        ds.request_close().unwrap();
        assert_eq!(ds.observer().events().last(), Some(&SourceEvent::CloseRequested));
    }

    #[test]
    fn test_ui_only_refuses_to_scan() {
        let (_, mut ds) = source();
        open(&mut ds);
        let mut ui = Payload::UserInterface(UserInterface::default());
        let rc = call(&mut ds, DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDSUIONLY, &mut ui);
        assert_eq!(rc, ReturnCode::Success);
        assert_eq!(ds.state(), TwainState::Enabled);
        assert!(ds.scan().is_err());
        assert_eq!(ds.pending_count(), 0);
    }

    #[test]
    fn test_cancelled_scan_keeps_source_usable() {
        let backend = SimulatedBackend::new();
        let mut ds = source_with(backend, RecordingObserver::with_ui());
        open(&mut ds);
        enable(&mut ds, true);
        let token = ds.cancel_token();
        token.cancel();
        // a new scan clears the previous request
        ds.scan().unwrap();
        assert!(ds.observer().alerts().is_empty());
    }

    #[test]
    fn test_cancel_during_three_pass_scan() {
        let backend = SimulatedBackend::new();
        let mut ds = source_with(backend.clone(), RecordingObserver::with_ui());
        open(&mut ds);
        let mode = ds.devices().options().find("mode").unwrap();
        ds.set_option(mode, OptionValue::Text("Color".into())).unwrap();
        let three_pass = ds.devices().options().find("three-pass").unwrap();
        ds.set_option(three_pass, OptionValue::Bool(true)).unwrap();
        enable(&mut ds, true);

        *ds.observer().cancel_on_progress.lock().unwrap() = Some(ds.cancel_token());
        let err = ds.scan().unwrap_err();
        assert!(matches!(&err, TwainError::BackendFailure(e) if e.is_cancelled()));
        let frames = ds
            .observer()
            .events()
            .into_iter()
            .filter(|e| matches!(e, SourceEvent::Progress { .. }))
            .count();
        assert_eq!(frames, 1);
        assert_eq!(ds.state(), TwainState::Enabled);
        assert_eq!(ds.pending_count(), 0);
        assert!(ds.observer().alerts().is_empty());
    }

    #[test]
    fn test_status_is_one_shot() {
        let (_, mut ds) = source();
        open(&mut ds);
        let mut p = Payload::Status(Status::default());
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_EVENT, MSG_GET, &mut p), ReturnCode::Failure);
        assert_eq!(status(&mut ds), TWCC_BADPROTOCOL);
        assert_eq!(status(&mut ds), TWCC_SUCCESS);
    }

    #[test]
    fn test_wrong_payload_is_bad_protocol() {
        let (_, mut ds) = source();
        open(&mut ds);
        let mut p = Payload::Status(Status::default());
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_CAPABILITY, MSG_GET, &mut p), ReturnCode::Failure);
        assert_eq!(status(&mut ds), TWCC_BADPROTOCOL);
    }

    #[test]
    fn test_identity_and_xfer_group() {
        let (_, mut ds) = source();
        let mut id = Payload::Identity(Identity::default());
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_IDENTITY, MSG_GET, &mut id), ReturnCode::Success);
        let Payload::Identity(id) = id else { unreachable!() };
        assert_eq!(id.product_name, "TWAIN SANE Interface");

        open(&mut ds);
        let mut id = Payload::Identity(Identity::default());
        call(&mut ds, DG_CONTROL, DAT_IDENTITY, MSG_GET, &mut id);
        let Payload::Identity(id) = id else { unreachable!() };
        assert_eq!(id.id, 7);

        let mut group = Payload::XferGroup(0);
        call(&mut ds, DG_CONTROL, DAT_XFERGROUP, MSG_GET, &mut group);
        assert_eq!(group, Payload::XferGroup(DG_IMAGE));
    }

    #[test]
    fn test_layout_never_inverts_backend_region() {
        let (backend, mut ds) = source();
        open(&mut ds);
        let (rc, _) = layout(&mut ds, MSG_SET, inches(1.0, 1.0, 2.0, 2.0));
        assert_eq!(rc, ReturnCode::Success);
        // entirely past the old far corner
        let (rc, _) = layout(&mut ds, MSG_SET, inches(5.0, 6.0, 7.0, 8.0));
        assert_eq!(rc, ReturnCode::Success);
        // and back before the old near corner
        layout(&mut ds, MSG_SET, inches(0.5, 0.5, 1.0, 1.0));
        assert!(!backend.region_was_inverted());

        let (_, frame) = layout(&mut ds, MSG_GET, Frame::default());
        assert!((frame.right.to_f64() - 1.0).abs() < 0.01);
        assert!((frame.top.to_f64() - 0.5).abs() < 0.01);

        let (rc, _) = layout(&mut ds, MSG_SET, inches(4.0, 1.0, 2.0, 3.0));
        assert_eq!(rc, ReturnCode::CheckStatus);
        assert!(!backend.region_was_inverted());
        assert_eq!(ds.region_label().unwrap(), "0.0 x 50.8 mm");
    }

    #[test]
    fn test_layout_reports_scanned_geometry() {
        let (_, mut ds) = source();
        open(&mut ds);
        layout(&mut ds, MSG_SET, inches(1.0, 2.0, 3.0, 4.0));
        enable(&mut ds, false);
        let (rc, frame) = layout(&mut ds, MSG_GET, Frame::default());
        assert_eq!(rc, ReturnCode::Success);
        assert!((frame.left.to_f64() - 1.0).abs() < 0.02);
        assert!((frame.bottom.to_f64() - 4.0).abs() < 0.02);
    }

    #[test]
    fn test_palette_only_for_palette_images() {
        let (_, mut ds) = source();
        open(&mut ds);
        enable(&mut ds, false);
        let mut p = Payload::Palette8(Box::default());
        assert_eq!(call(&mut ds, DG_IMAGE, DAT_PALETTE8, MSG_GET, &mut p), ReturnCode::Failure);
        assert_eq!(status(&mut ds), TWCC_BADPROTOCOL);
    }

    fn current_resolution(ds: &mut Source) -> Item {
        let (_, c) = cap(ds, MSG_GETCURRENT, Capability::request(ICAP_XRESOLUTION));
        c.container.as_ref().and_then(Container::one_value).cloned().unwrap()
    }

    fn set_resolution(ds: &mut Source, dpi: i32) {
        let set = Capability::with_value(ICAP_XRESOLUTION, Item::Fix32(Fix32::from_int(dpi)));
        assert_eq!(cap(ds, MSG_SET, set).0, ReturnCode::Success);
    }

    #[test]
    fn test_custom_data_round_trip() {
        let (_, mut ds) = source();
        open(&mut ds);
        set_resolution(&mut ds, 300);
        let mut blob = Payload::CustomData(Vec::new());
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_CUSTOMDSDATA, MSG_GET, &mut blob), ReturnCode::Success);

        set_resolution(&mut ds, 100);
        assert_eq!(current_resolution(&mut ds), Item::Fix32(Fix32::from_int(100)));
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_CUSTOMDSDATA, MSG_SET, &mut blob), ReturnCode::Success);
        assert_eq!(current_resolution(&mut ds), Item::Fix32(Fix32::from_int(300)));

        let mut junk = Payload::CustomData(b"device = [".to_vec());
        assert_eq!(call(&mut ds, DG_CONTROL, DAT_CUSTOMDSDATA, MSG_SET, &mut junk), ReturnCode::Failure);
        assert_eq!(status(&mut ds), TWCC_BADVALUE);
    }

    #[test]
    fn test_settings_survive_close_and_reopen() {
        let (_, mut ds) = source();
        open(&mut ds);
        set_resolution(&mut ds, 300);
        let mut id = Payload::Identity(Identity::default());
        call(&mut ds, DG_CONTROL, DAT_IDENTITY, MSG_CLOSEDS, &mut id);

        open(&mut ds);
        assert_eq!(current_resolution(&mut ds), Item::Fix32(Fix32::from_int(300)));
    }

    #[test]
    fn test_preferences_file_remembers_device() {
        let dir = tempfile::tempdir().unwrap();
        let config = SourceConfig {
            preferences_path: Some(dir.path().join("prefs.toml")),
            ..SourceConfig::default()
        };
        let new_source = || {
            DataSource::with_observer(
                SimulatedBackend::new(),
                config.clone(),
                Arc::new(RecordingObserver::default()),
            )
        };

        let mut ds = new_source();
        open(&mut ds);
        ds.select_device(1).unwrap();
        assert!(ds.observer().events().contains(&SourceEvent::OptionsRebuilt));
        let mut id = Payload::Identity(Identity::default());
        call(&mut ds, DG_CONTROL, DAT_IDENTITY, MSG_CLOSEDS, &mut id);
        drop(ds);

        let mut ds = new_source();
        open(&mut ds);
        assert_eq!(ds.devices().current_index(), Some(1));
    }

    #[test]
    fn test_set_option_notifies_observer() {
        let (_, mut ds) = source();
        open(&mut ds);
        let index = ds.devices().options().find("brightness").unwrap();
        ds.set_option(index, OptionValue::Word(10)).unwrap();
        assert!(ds.observer().events().contains(&SourceEvent::OptionRefreshed {
            index,
            name: "brightness".into(),
        }));

        let mode = ds.devices().options().find("mode").unwrap();
        let (_, info) = ds.set_option(mode, OptionValue::Text("Color".into())).unwrap();
        assert!(info.reload_options);
        assert_eq!(ds.observer().events().last(), Some(&SourceEvent::OptionsRebuilt));
    }

    #[test]
    fn test_automatic_option_from_ui() {
        let (_, mut ds) = source();
        open(&mut ds);
        let index = ds.devices().options().find("brightness").unwrap();
        ds.set_option(index, OptionValue::Word(40)).unwrap();
        ds.set_option_auto(index).unwrap();
        assert_eq!(ds.devices().get(index).unwrap(), OptionValue::Word(0));
        assert_eq!(
            ds.observer().events().last(),
            Some(&SourceEvent::OptionRefreshed {
                index,
                name: "brightness".into(),
            })
        );

        let mode = ds.devices().options().find("mode").unwrap();
        assert!(matches!(
            ds.set_option_auto(mode),
            Err(TwainError::BackendFailure(_))
        ));
    }

    #[test]
    fn test_select_unknown_device() {
        let (_, mut ds) = source();
        open(&mut ds);
        assert!(matches!(ds.select_device(5), Err(TwainError::NoDevice)));
        assert_eq!(ds.devices().current_index(), Some(0));
    }

    #[test]
    fn test_feeder_uses_its_device_list_resolution() {
        let backend = SimulatedBackend::with_models(&[SimulatedModel::Feeder]);
        let mut ds = source_with(backend, RecordingObserver::default());
        open(&mut ds);
        let set = Capability::with_value(ICAP_XRESOLUTION, Item::Fix32(Fix32::from_int(200)));
        assert_eq!(cap(&mut ds, MSG_SET, set).0, ReturnCode::CheckStatus);
    }
}
