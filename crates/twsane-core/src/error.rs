//! Protocol-level error taxonomy.
//!
//! Every failing entry-point call resolves to exactly one of these kinds,
//! which in turn maps onto a TWAIN condition code.

use thiserror::Error;

use crate::backend::BackendError;
use crate::protocol::ContainerError;
use crate::protocol::constants::*;
use crate::state::TwainState;

#[derive(Error, Debug)]
pub enum TwainError {
    #[error("{operation} is not legal in state {state}")]
    ProtocolViolation {
        operation: &'static str,
        state: TwainState,
    },

    #[error("Capability 0x{0:04X} is not supported")]
    UnsupportedCapability(u16),

    #[error("Operation not supported: {what}")]
    UnsupportedOperation { what: String, capability: bool },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Out of memory: {requested} bytes")]
    ResourceExhaustion { requested: usize },

    #[error("Backend failure: {0}")]
    BackendFailure(#[from] BackendError),

    #[error("No scanner devices available")]
    NoDevice,

    #[error("Authentication cancelled for {resource}")]
    AuthenticationCancelled { resource: String },
}

impl TwainError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }

    /// Message outside a capability's supported subset.
    pub(crate) fn bad_cap_operation(cap: u16, msg: u16) -> Self {
        Self::UnsupportedOperation {
            what: format!("message 0x{msg:04X} on capability 0x{cap:04X}"),
            capability: true,
        }
    }

    /// Message or data argument the source does not model.
    pub(crate) fn bad_protocol(what: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            what: what.into(),
            capability: false,
        }
    }

    /// TWAIN condition code reported through `DAT_STATUS`.
    pub fn condition_code(&self) -> u16 {
        match self {
            TwainError::ProtocolViolation { .. } => TWCC_SEQERROR,
            TwainError::UnsupportedCapability(_) => TWCC_CAPUNSUPPORTED,
            TwainError::UnsupportedOperation {
                capability: true, ..
            } => TWCC_CAPBADOPERATION,
            TwainError::UnsupportedOperation {
                capability: false, ..
            } => TWCC_BADPROTOCOL,
            TwainError::InvalidValue(_) => TWCC_BADVALUE,
            TwainError::ResourceExhaustion { .. } => TWCC_LOWMEMORY,
            TwainError::BackendFailure(_) => TWCC_OPERATIONERROR,
            TwainError::NoDevice => TWCC_NODS,
            TwainError::AuthenticationCancelled { .. } => TWCC_OPERATIONERROR,
        }
    }

    /// Whether the failure may be shown to the user as a modal alert.
    pub fn is_alertable(&self) -> bool {
        match self {
            TwainError::BackendFailure(e) => !e.is_cancelled(),
            TwainError::NoDevice => true,
            _ => false,
        }
    }
}

impl From<ContainerError> for TwainError {
    fn from(e: ContainerError) -> Self {
        Self::InvalidValue(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendStatus;

    #[test]
    fn test_condition_codes() {
        let e = TwainError::ProtocolViolation {
            operation: "MSG_ENDXFER",
            state: TwainState::Open,
        };
        assert_eq!(e.condition_code(), TWCC_SEQERROR);
        assert_eq!(
            TwainError::bad_cap_operation(ICAP_BITORDER, MSG_SET).condition_code(),
            TWCC_CAPBADOPERATION
        );
        assert_eq!(
            TwainError::bad_protocol("DAT_EVENT").condition_code(),
            TWCC_BADPROTOCOL
        );
        assert_eq!(
            TwainError::ResourceExhaustion { requested: 1 }.condition_code(),
            TWCC_LOWMEMORY
        );
    }

    #[test]
    fn test_cancelled_scan_is_not_alertable() {
        let cancelled = TwainError::BackendFailure(BackendError::new(BackendStatus::Cancelled));
        assert!(!cancelled.is_alertable());
        let jammed = TwainError::BackendFailure(BackendError::new(BackendStatus::Jammed));
        assert!(jammed.is_alertable());
        assert!(!TwainError::invalid("x").is_alertable());
    }
}
