//! Control group handlers: identity, user interface, pending transfers,
//! status and custom data.

use tracing::{debug, info, instrument, warn};

use super::{HandleResult, HandlerContext, wrong_payload};
use crate::acquire::{ScanRequest, acquire};
use crate::backend::Backend;
use crate::capability::{ScanRegion, current_resolution};
use crate::error::TwainError;
use crate::events::{AlertKind, SourceEvent, SourceObserver};
use crate::protocol::constants::*;
use crate::protocol::{Fix32, Frame, Payload, SetupMemXfer};
use crate::session::{CustomData, Preferences};
use crate::state::machine::TwainState;

/// Identity Get / OpenDS / CloseDS.
pub fn handle_identity<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    msg: u16,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::Identity(identity) = payload else {
        return Err(wrong_payload(payload));
    };
    match msg {
        MSG_GET => {
            *identity = ctx.config.identity();
            identity.id = ctx.state.source_id;
        }
        MSG_OPENDS => {
            open_ds(ctx)?;
            ctx.state.source_id = identity.id;
        }
        _ => {
            persist_preferences(ctx);
            ctx.devices.close_all();
            ctx.state.reset();
            ctx.goto(TwainState::Closed);
        }
    }
    Ok(HandleResult::Success)
}

#[instrument(skip_all, fields(origin = %ctx.origin))]
fn open_ds<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
) -> Result<(), TwainError> {
    let prefs = ctx.load_preferences();
    if let Err(e) = select_initial_device(ctx, &prefs) {
        warn!(error = %e, "Cannot open a device");
        ctx.devices.close_all();
        ctx.alert(AlertKind::DeviceUnavailable, &e);
        return Err(e);
    }
    ctx.state.reset();
    ctx.goto(TwainState::Open);
    Ok(())
}

/// Open the device used last, or the first one, and restore its settings.
fn select_initial_device<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    prefs: &Preferences,
) -> Result<(), TwainError> {
    if ctx.devices.enumerate()?.is_empty() {
        return Err(TwainError::NoDevice);
    }
    let index = prefs
        .current_device
        .as_deref()
        .and_then(|name| ctx.devices.find_device(name))
        .unwrap_or(0);
    ctx.devices.open(index, ctx.authenticator)?;
    restore_saved(ctx, prefs)
}

fn restore_saved<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    prefs: &Preferences,
) -> Result<(), TwainError> {
    let Some(snapshot) = ctx
        .devices
        .current_display_name()
        .and_then(|name| prefs.devices.get(&name))
    else {
        return Ok(());
    };
    ctx.devices.restore(snapshot)?;
    debug!(options = snapshot.len(), "Saved settings restored");
    Ok(())
}

/// Store the current device's settings. Failures are only logged.
pub(crate) fn persist_preferences<B: Backend, O: SourceObserver>(ctx: &HandlerContext<'_, B, O>) {
    let Some(name) = ctx.devices.current_display_name() else {
        return;
    };
    let mut prefs = ctx.load_preferences();
    prefs.devices.insert(name.clone(), ctx.devices.snapshot());
    prefs.current_device = Some(name);
    if let Err(e) = ctx.store.save(&prefs) {
        warn!(error = %e, "Cannot save preferences");
    }
}

/// Make device `index` current, carrying settings across the switch.
pub(crate) fn switch_device<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    index: usize,
) -> Result<(), TwainError> {
    if ctx.devices.current_index() == Some(index) {
        return Ok(());
    }
    persist_preferences(ctx);
    ctx.devices.open(index, ctx.authenticator)?;
    let prefs = ctx.load_preferences();
    restore_saved(ctx, &prefs)?;
    ctx.emit(SourceEvent::OptionsRebuilt);
    Ok(())
}

/// Acquire one image into the pending queue.
fn scan_now<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
) -> Result<(), TwainError> {
    if ctx.state.ui_only {
        return Err(TwainError::bad_protocol("source enabled for settings only"));
    }
    ctx.cancel.reset();
    let (x_resolution, y_resolution) = current_resolution(ctx.devices)?;
    let request = ScanRequest {
        x_resolution,
        y_resolution,
        default_length_mm: ctx.config.default_document_length_mm,
        chunk_size: ctx.config.read_chunk_size,
        indicators: ctx.state.settings.indicators,
    };
    let origin = ScanRegion::read(ctx.devices)
        .map(|r| r.to_frame(x_resolution.to_f64(), y_resolution.to_f64()))
        .unwrap_or_default();

    let image = acquire(ctx.devices, &request, ctx.cancel, ctx.observer)?;

    let (width, height) = image.extent_inches();
    let offset = |a: Fix32, b: Fix32| Fix32::from_bits(a.to_bits().saturating_add(b.to_bits()));
    ctx.state.scanned_layout = Some(Frame {
        left: origin.left,
        top: origin.top,
        right: offset(origin.left, width),
        bottom: offset(origin.top, height),
    });
    ctx.state.queue.push_back(image);
    Ok(())
}

fn announce_transfer<B: Backend, O: SourceObserver>(ctx: &mut HandlerContext<'_, B, O>) {
    ctx.goto(TwainState::TransferReady);
    ctx.emit(SourceEvent::TransferReady {
        pending: ctx.state.queue.len(),
    });
}

/// The UI's scan button.
pub(crate) fn scan_from_ui<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
) -> Result<(), TwainError> {
    if let Err(e) = scan_now(ctx) {
        ctx.alert(AlertKind::ScanFailed, &e);
        return Err(e);
    }
    announce_transfer(ctx);
    Ok(())
}

/// EnableDS / EnableDSUIOnly / DisableDS.
pub fn handle_user_interface<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    msg: u16,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::UserInterface(ui) = payload else {
        return Err(wrong_payload(payload));
    };
    match msg {
        MSG_ENABLEDS => {
            ctx.state.show_ui = ui.show_ui;
            ctx.state.ui_only = false;
            ctx.state.scanned_layout = None;
            if ui.show_ui && ctx.observer.presents_ui() {
                ctx.goto(TwainState::Enabled);
                ctx.emit(SourceEvent::UiShown { ui_only: false });
                return Ok(HandleResult::Success);
            }
            info!("Scanning without UI");
            if let Err(e) = scan_now(ctx) {
                ctx.alert(AlertKind::ScanFailed, &e);
                return Err(e);
            }
            ctx.goto(TwainState::Enabled);
            announce_transfer(ctx);
        }
        MSG_ENABLEDSUIONLY => {
            ctx.state.show_ui = true;
            ctx.state.ui_only = true;
            ctx.goto(TwainState::Enabled);
            ctx.emit(SourceEvent::UiShown { ui_only: true });
        }
        _ => {
            if ctx.state.ui_only {
                persist_preferences(ctx);
            }
            ctx.state.ui_only = false;
            ctx.state.queue.clear();
            ctx.emit(SourceEvent::UiHidden);
            ctx.goto(TwainState::Open);
        }
    }
    Ok(HandleResult::Success)
}

/// PendingXfers Get / EndXfer / Reset.
pub fn handle_pending_xfers<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    msg: u16,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::PendingXfers(pending) = payload else {
        return Err(wrong_payload(payload));
    };
    match msg {
        MSG_GET => {}
        MSG_ENDXFER => {
            ctx.state.queue.pop_front();
            if ctx.state.queue.is_empty() {
                ctx.goto(TwainState::Enabled);
            } else {
                ctx.goto(TwainState::TransferReady);
            }
        }
        _ => {
            let dropped = ctx.state.queue.len();
            ctx.state.queue.clear();
            debug!(dropped, "Pending transfers discarded");
            ctx.goto(TwainState::Enabled);
        }
    }
    pending.count = ctx.state.queue.len() as u16;
    Ok(HandleResult::Success)
}

/// SetupMemXfer Get: sizes derived from the pending image, don't-care
/// before one exists.
pub fn handle_setup_mem_xfer<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::SetupMemXfer(setup) = payload else {
        return Err(wrong_payload(payload));
    };
    *setup = ctx
        .state
        .queue
        .front()
        .map_or(SetupMemXfer::DONT_CARE, |image| image.setup());
    Ok(HandleResult::Success)
}

pub fn handle_status<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::Status(status) = payload else {
        return Err(wrong_payload(payload));
    };
    status.condition_code = ctx.state.take_condition().unwrap_or(TWCC_SUCCESS);
    Ok(HandleResult::Success)
}

pub fn handle_xfer_group(payload: &mut Payload) -> Result<HandleResult, TwainError> {
    let Payload::XferGroup(group) = payload else {
        return Err(wrong_payload(payload));
    };
    *group = DG_IMAGE;
    Ok(HandleResult::Success)
}

/// CustomDSData Get / Set: the current device and its settings as one blob.
pub fn handle_custom_data<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    msg: u16,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::CustomData(blob) = payload else {
        return Err(wrong_payload(payload));
    };
    if msg == MSG_GET {
        let data = CustomData {
            device: ctx.devices.current_display_name(),
            options: ctx.devices.snapshot(),
        };
        *blob = data
            .to_bytes()
            .map_err(|e| TwainError::invalid(e.to_string()))?;
        return Ok(HandleResult::Success);
    }

    let data = CustomData::from_bytes(blob).map_err(|e| TwainError::invalid(e.to_string()))?;
    if let Some(index) = data.device.as_deref().and_then(|d| ctx.devices.find_device(d)) {
        switch_device(ctx, index)?;
    }
    ctx.devices.restore(&data.options)?;
    ctx.emit(SourceEvent::OptionsRebuilt);
    Ok(HandleResult::Success)
}
