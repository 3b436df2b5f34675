//! Device session: enumeration, open handles, option index, persistence.

pub mod auth;
pub mod device;
pub mod options;
pub mod store;

pub use auth::{Authenticator, NoAuthenticator, StaticAuthenticator};
pub use device::{DeviceSession, display_name};
pub use options::OptionIndex;
pub use store::{
    CustomData, MemoryStore, OptionSnapshot, PersistedValue, PreferenceStore, Preferences,
    StoreError, TomlFileStore,
};
