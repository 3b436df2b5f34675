//! Entry-point handlers.
//!
//! Calls are routed through a fixed table keyed by data group, data
//! argument type and message. Each entry names the states the call is
//! legal in; the window is checked before the handler runs, so an
//! out-of-sequence call never reaches the backend.
//!
//! - `capability`: capability negotiation
//! - `control`: identity, user interface, transfers, status, custom data
//! - `image`: image info, layout and the three transfer kinds

mod capability;
mod control;
mod image;

use std::ops::RangeInclusive;

use tracing::warn;

use crate::acquire::CancelToken;
use crate::backend::Backend;
use crate::config::SourceConfig;
use crate::error::TwainError;
use crate::events::{AlertKind, SourceEvent, SourceObserver};
use crate::protocol::constants::*;
use crate::protocol::{Payload, ReturnCode};
use crate::session::{Authenticator, DeviceSession, PreferenceStore, Preferences};
use crate::state::machine::{SessionState, TwainState};

pub(crate) use control::{scan_from_ui, switch_device};

use TwainState::{Closed, Enabled, Open, TransferReady, Transferring};

/// Successful outcome of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    Success,
    /// Succeeded with a caveat, e.g. a value the backend adjusted.
    CheckStatus,
    /// The last byte of an image went out.
    XferDone,
}

impl From<HandleResult> for ReturnCode {
    fn from(result: HandleResult) -> Self {
        match result {
            HandleResult::Success => ReturnCode::Success,
            HandleResult::CheckStatus => ReturnCode::CheckStatus,
            HandleResult::XferDone => ReturnCode::XferDone,
        }
    }
}

/// Handler context containing all resources of one call.
pub struct HandlerContext<'a, B: Backend, O: SourceObserver> {
    pub devices: &'a mut DeviceSession<B>,
    pub state: &'a mut SessionState,
    pub observer: &'a O,
    pub authenticator: &'a dyn Authenticator,
    pub store: &'a dyn PreferenceStore,
    pub config: &'a SourceConfig,
    pub cancel: &'a CancelToken,
    /// Product name of the calling application.
    pub origin: &'a str,
}

impl<B: Backend, O: SourceObserver> HandlerContext<'_, B, O> {
    pub(crate) fn emit(&self, event: SourceEvent) {
        self.observer.on_event(&event);
    }

    /// Raise a modal alert for `error`, unless nobody presents UI, the
    /// caller is a silent bridge, or the failure is not worth showing.
    pub(crate) fn alert(&self, kind: AlertKind, error: &TwainError) {
        if !self.observer.presents_ui()
            || self.config.is_silent_caller(self.origin)
            || !error.is_alertable()
        {
            return;
        }
        self.emit(SourceEvent::Alert {
            kind,
            message: error.to_string(),
        });
    }

    pub(crate) fn goto(&mut self, to: TwainState) {
        let from = self.state.state;
        if from != to {
            self.state.goto_state(to);
            self.emit(SourceEvent::StateChanged { from, to });
        }
    }

    /// Stored preferences; a broken store reads as empty.
    pub(crate) fn load_preferences(&self) -> Preferences {
        self.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Cannot read preferences");
            Preferences::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Capability,
    Identity,
    PendingXfers,
    SetupMemXfer,
    Status,
    UserInterface,
    XferGroup,
    CustomData,
    ImageInfo,
    ImageLayout,
    ImageMemXfer,
    ImageNativeXfer,
    Palette8,
}

struct Rule {
    dg: u32,
    dat: u16,
    msg: u16,
    legal: RangeInclusive<TwainState>,
    route: Route,
    operation: &'static str,
}

const fn rule(
    dg: u32,
    dat: u16,
    msg: u16,
    legal: RangeInclusive<TwainState>,
    route: Route,
    operation: &'static str,
) -> Rule {
    Rule {
        dg,
        dat,
        msg,
        legal,
        route,
        operation,
    }
}

#[rustfmt::skip]
const ROUTES: &[Rule] = &[
    rule(DG_CONTROL, DAT_CAPABILITY, MSG_GET, Open..=Transferring, Route::Capability, "Capability Get"),
    rule(DG_CONTROL, DAT_CAPABILITY, MSG_GETCURRENT, Open..=Transferring, Route::Capability, "Capability GetCurrent"),
    rule(DG_CONTROL, DAT_CAPABILITY, MSG_GETDEFAULT, Open..=Transferring, Route::Capability, "Capability GetDefault"),
    rule(DG_CONTROL, DAT_CAPABILITY, MSG_QUERYSUPPORT, Open..=Transferring, Route::Capability, "Capability QuerySupport"),
    rule(DG_CONTROL, DAT_CAPABILITY, MSG_SET, Open..=Open, Route::Capability, "Capability Set"),
    rule(DG_CONTROL, DAT_CAPABILITY, MSG_RESET, Open..=Open, Route::Capability, "Capability Reset"),
    rule(DG_CONTROL, DAT_IDENTITY, MSG_GET, Closed..=Transferring, Route::Identity, "Identity Get"),
    rule(DG_CONTROL, DAT_IDENTITY, MSG_OPENDS, Closed..=Closed, Route::Identity, "OpenDS"),
    rule(DG_CONTROL, DAT_IDENTITY, MSG_CLOSEDS, Open..=Open, Route::Identity, "CloseDS"),
    rule(DG_CONTROL, DAT_PENDINGXFERS, MSG_GET, Open..=Transferring, Route::PendingXfers, "PendingXfers Get"),
    rule(DG_CONTROL, DAT_PENDINGXFERS, MSG_ENDXFER, TransferReady..=Transferring, Route::PendingXfers, "EndXfer"),
    rule(DG_CONTROL, DAT_PENDINGXFERS, MSG_RESET, TransferReady..=TransferReady, Route::PendingXfers, "PendingXfers Reset"),
    rule(DG_CONTROL, DAT_SETUPMEMXFER, MSG_GET, Open..=Transferring, Route::SetupMemXfer, "SetupMemXfer Get"),
    rule(DG_CONTROL, DAT_STATUS, MSG_GET, Open..=Transferring, Route::Status, "Status Get"),
    rule(DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDS, Open..=Open, Route::UserInterface, "EnableDS"),
    rule(DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDSUIONLY, Open..=Open, Route::UserInterface, "EnableDSUIOnly"),
    rule(DG_CONTROL, DAT_USERINTERFACE, MSG_DISABLEDS, Enabled..=Enabled, Route::UserInterface, "DisableDS"),
    rule(DG_CONTROL, DAT_XFERGROUP, MSG_GET, Open..=Transferring, Route::XferGroup, "XferGroup Get"),
    rule(DG_CONTROL, DAT_CUSTOMDSDATA, MSG_GET, Open..=Open, Route::CustomData, "CustomDSData Get"),
    rule(DG_CONTROL, DAT_CUSTOMDSDATA, MSG_SET, Open..=Open, Route::CustomData, "CustomDSData Set"),
    rule(DG_IMAGE, DAT_IMAGEINFO, MSG_GET, TransferReady..=Transferring, Route::ImageInfo, "ImageInfo Get"),
    rule(DG_IMAGE, DAT_IMAGELAYOUT, MSG_GET, Open..=TransferReady, Route::ImageLayout, "ImageLayout Get"),
    rule(DG_IMAGE, DAT_IMAGELAYOUT, MSG_SET, Open..=Open, Route::ImageLayout, "ImageLayout Set"),
    rule(DG_IMAGE, DAT_IMAGEMEMXFER, MSG_GET, TransferReady..=Transferring, Route::ImageMemXfer, "ImageMemXfer Get"),
    rule(DG_IMAGE, DAT_IMAGENATIVEXFER, MSG_GET, TransferReady..=TransferReady, Route::ImageNativeXfer, "ImageNativeXfer Get"),
    rule(DG_IMAGE, DAT_PALETTE8, MSG_GET, TransferReady..=Transferring, Route::Palette8, "Palette8 Get"),
];

fn wrong_payload(payload: &Payload) -> TwainError {
    TwainError::bad_protocol(format!("unexpected {} argument", payload.name()))
}

/// Route one entry-point call.
pub fn dispatch<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    dg: u32,
    dat: u16,
    msg: u16,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Some(rule) = ROUTES
        .iter()
        .find(|r| r.dg == dg && r.dat == dat && r.msg == msg)
    else {
        let what = if ROUTES.iter().any(|r| r.dg == dg && r.dat == dat) {
            format!("message 0x{msg:04X} on data argument 0x{dat:04X}")
        } else {
            format!("data argument 0x{dat:04X} in group 0x{dg:X}")
        };
        return Err(TwainError::bad_protocol(what));
    };
    ctx.state.require(&rule.legal, rule.operation)?;

    match rule.route {
        Route::Capability => capability::handle_capability(ctx, msg, payload),
        Route::Identity => control::handle_identity(ctx, msg, payload),
        Route::PendingXfers => control::handle_pending_xfers(ctx, msg, payload),
        Route::SetupMemXfer => control::handle_setup_mem_xfer(ctx, payload),
        Route::Status => control::handle_status(ctx, payload),
        Route::UserInterface => control::handle_user_interface(ctx, msg, payload),
        Route::XferGroup => control::handle_xfer_group(payload),
        Route::CustomData => control::handle_custom_data(ctx, msg, payload),
        Route::ImageInfo => image::handle_image_info(ctx, payload),
        Route::ImageLayout => image::handle_image_layout(ctx, msg, payload),
        Route::ImageMemXfer => image::handle_mem_xfer(ctx, payload),
        Route::ImageNativeXfer => image::handle_native_xfer(ctx, payload),
        Route::Palette8 => image::handle_palette(ctx, payload),
    }
}
