//! Scanner backend layer.
//!
//! Provides the SANE-style `Backend` trait, the option model with its
//! constraint rules, and a simulated backend for testing.

pub mod option;
pub mod simulated;
pub mod traits;

pub use option::{
    NumericConstraint, OptionCaps, OptionDescriptor, OptionKind, OptionValue, Unit,
    constrain_value,
};
pub use simulated::{SimulatedBackend, SimulatedModel};
pub use traits::{
    Backend, BackendError, BackendStatus, Credentials, DeviceInfo, FrameFormat, HandleId,
    Parameters, SetInfo,
};
