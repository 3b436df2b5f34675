//! State machine implementation for the TWAIN session.

use std::collections::VecDeque;
use std::fmt;
use std::ops::RangeInclusive;

use crate::acquire::Image;
use crate::capability::TransferSettings;
use crate::error::TwainError;
use crate::protocol::Frame;

/// Source states 3 to 7 of the TWAIN lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TwainState {
    /// Loaded, not opened by the host.
    #[default]
    Closed = 3,
    /// Opened; capabilities may be negotiated.
    Open = 4,
    /// Enabled; the UI is up or a scan is running.
    Enabled = 5,
    /// At least one image is waiting.
    TransferReady = 6,
    /// An image transfer is under way.
    Transferring = 7,
}

impl TwainState {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TwainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TwainState::Closed => "CLOSED",
            TwainState::Open => "OPEN",
            TwainState::Enabled => "ENABLED",
            TwainState::TransferReady => "XFER_READY",
            TwainState::Transferring => "XFERRING",
        };
        write!(f, "{name}({})", self.number())
    }
}

/// Runtime state of one host session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub state: TwainState,
    pub settings: TransferSettings,
    /// Identity id the source manager assigned at open.
    pub source_id: u32,
    pub show_ui: bool,
    /// Enabled for settings only; scanning is refused.
    pub ui_only: bool,
    /// Geometry of the last image scanned in this enable cycle.
    pub scanned_layout: Option<Frame>,
    /// Images acquired and not yet ended by the host.
    pub queue: VecDeque<Image>,
    /// Condition code of the last failed call.
    condition: Option<u16>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: TwainState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// Fail with a sequence error unless the current state is in `legal`.
    pub fn require(
        &self,
        legal: &RangeInclusive<TwainState>,
        operation: &'static str,
    ) -> Result<(), TwainError> {
        if legal.contains(&self.state) {
            Ok(())
        } else {
            Err(TwainError::ProtocolViolation {
                operation,
                state: self.state,
            })
        }
    }

    pub fn latch(&mut self, condition: u16) {
        self.condition = Some(condition);
    }

    /// Condition of the last failure, cleared by reading it.
    pub fn take_condition(&mut self) -> Option<u16> {
        self.condition.take()
    }

    /// Back to a freshly loaded source.
    pub fn reset(&mut self) {
        *self = Self {
            state: self.state,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::TWCC_SEQERROR;

    #[test]
    fn test_states_are_ordered() {
        assert!(TwainState::Closed < TwainState::Open);
        assert!(TwainState::TransferReady < TwainState::Transferring);
        assert_eq!(TwainState::Enabled.number(), 5);
        assert_eq!(TwainState::TransferReady.to_string(), "XFER_READY(6)");
    }

    #[test]
    fn test_require_window() {
        let mut state = SessionState::new();
        let window = TwainState::Open..=TwainState::Transferring;
        let err = state.require(&window, "MSG_GET").unwrap_err();
        assert_eq!(err.condition_code(), TWCC_SEQERROR);
        state.goto_state(TwainState::Transferring);
        assert!(state.require(&window, "MSG_GET").is_ok());
    }

    #[test]
    fn test_condition_is_one_shot() {
        let mut state = SessionState::new();
        state.latch(TWCC_SEQERROR);
        assert_eq!(state.take_condition(), Some(TWCC_SEQERROR));
        assert_eq!(state.take_condition(), None);
    }

    #[test]
    fn test_reset_keeps_state() {
        let mut state = SessionState::new();
        state.goto_state(TwainState::Open);
        state.ui_only = true;
        state.settings.indicators = false;
        state.reset();
        assert_eq!(state.state, TwainState::Open);
        assert!(!state.ui_only);
        assert!(state.settings.indicators);
    }
}
