//! twsane-core: a TWAIN data source bridging to SANE-style scanner backends.
//!
//! A TWAIN host drives the source through one entry point; the source
//! translates capability negotiation onto the backend's option list, runs
//! the scan, and delivers the image natively or in memory chunks.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: TWAIN constants, 16.16 fixed point, containers, records
//! - **Backend**: the scanner driver interface, option model, simulated device
//! - **Session**: device enumeration, open handles, option index, preferences
//! - **Capability**: capability to option translation
//! - **Acquire**: read loop, scan buffer, image assembly and delivery
//! - **State**: state machine and call handlers
//! - **Events**: observer pattern for UI decoupling
//! - **Source**: the host-facing orchestrator
//!
//! # Example
//!
//! ```no_run
//! use twsane_core::protocol::constants::*;
//! use twsane_core::{
//!     DataSource, Identity, Payload, ReturnCode, SimulatedBackend, SourceConfig, UserInterface,
//! };
//!
//! let mut source = DataSource::new(SimulatedBackend::new(), SourceConfig::default());
//! let host = Identity::application("Example Host");
//!
//! let mut id = Payload::Identity(Identity::default());
//! source.entry(&host, DG_CONTROL, DAT_IDENTITY, MSG_OPENDS, &mut id);
//!
//! let mut ui = Payload::UserInterface(UserInterface::default());
//! let rc = source.entry(&host, DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDS, &mut ui);
//! assert_eq!(rc, ReturnCode::Success);
//! ```

pub mod acquire;
pub mod backend;
pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod source;
pub mod state;

// Re-exports for convenience
pub use acquire::{CancelToken, Image, ImageKind};
pub use backend::{Backend, BackendError, BackendStatus, OptionValue, SimulatedBackend, SimulatedModel};
pub use config::SourceConfig;
pub use error::TwainError;
pub use events::{AlertKind, NullObserver, SourceEvent, SourceObserver, TracingObserver};
pub use protocol::{Capability, Fix32, Identity, Payload, ReturnCode, UserInterface};
pub use session::{DeviceSession, PreferenceStore, StaticAuthenticator};
pub use source::DataSource;
pub use state::TwainState;
