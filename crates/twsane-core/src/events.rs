//! Event system for UI decoupling.
//!
//! The data source never draws anything itself. Whatever presentation layer
//! is attached (a dialog, the CLI, nothing at all) subscribes to these
//! events instead.

use std::fmt;

use crate::state::TwainState;

/// Kind of modal alert a presentation layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// No device could be opened.
    DeviceUnavailable,
    /// The backend failed during an acquisition.
    ScanFailed,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::DeviceUnavailable => write!(f, "Device unavailable"),
            AlertKind::ScanFailed => write!(f, "Scan failed"),
        }
    }
}

/// Events emitted by the data source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Show the settings UI.
    UiShown { ui_only: bool },
    /// Hide the settings UI.
    UiHidden,
    /// Images are waiting; the host should be sent `MSG_XFERREADY`.
    TransferReady { pending: usize },
    /// The user asked to close; the host should be sent `MSG_CLOSEDSREQ`.
    CloseRequested,
    /// The option list changed shape and must be rebuilt.
    OptionsRebuilt,
    /// A single option changed value.
    OptionRefreshed { index: usize, name: String },
    /// Modal alert.
    Alert { kind: AlertKind, message: String },
    /// Protocol state changed.
    StateChanged { from: TwainState, to: TwainState },
    /// A frame finished reading.
    Progress { frame: usize, bytes: usize },
}

/// Observer trait for receiving data source events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait SourceObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &SourceEvent);

    /// Whether a presentation layer is attached. Alerts are only raised
    /// when it is.
    fn presents_ui(&self) -> bool {
        false
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SourceObserver for NullObserver {
    fn on_event(&self, _event: &SourceEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SourceObserver for TracingObserver {
    fn on_event(&self, event: &SourceEvent) {
        match event {
            SourceEvent::UiShown { ui_only } => tracing::info!(ui_only, "UI shown"),
            SourceEvent::UiHidden => tracing::info!("UI hidden"),
            SourceEvent::TransferReady { pending } => {
                tracing::info!(pending, "Transfer ready");
            }
            SourceEvent::CloseRequested => tracing::info!("Close requested"),
            SourceEvent::OptionsRebuilt => tracing::debug!("Option list rebuilt"),
            SourceEvent::OptionRefreshed { index, name } => {
                tracing::debug!(index, name = %name, "Option refreshed");
            }
            SourceEvent::Alert { kind, message } => {
                tracing::error!(kind = %kind, "{}", message);
            }
            SourceEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            SourceEvent::Progress { frame, bytes } => {
                tracing::debug!(frame, bytes, "Frame read");
            }
        }
    }
}
