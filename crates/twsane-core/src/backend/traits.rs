//! Scanner backend abstraction.
//!
//! Defines the `Backend` trait modelled on the SANE API, allowing
//! different implementations (a libsane binding, the simulated backend).

use std::fmt;
use thiserror::Error;

use super::option::{OptionDescriptor, OptionValue};

/// SANE status codes other than `STATUS_GOOD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Unsupported,
    Cancelled,
    DeviceBusy,
    Inval,
    Jammed,
    NoDocs,
    CoverOpen,
    IoError,
    NoMem,
    AccessDenied,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BackendStatus::Unsupported => "Operation not supported",
            BackendStatus::Cancelled => "Operation was canceled",
            BackendStatus::DeviceBusy => "Device busy",
            BackendStatus::Inval => "Invalid argument",
            BackendStatus::Jammed => "Document feeder jammed",
            BackendStatus::NoDocs => "Document feeder out of documents",
            BackendStatus::CoverOpen => "Scanner cover is open",
            BackendStatus::IoError => "Error during device I/O",
            BackendStatus::NoMem => "Out of memory",
            BackendStatus::AccessDenied => "Access to resource has been denied",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status}{}", context.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct BackendError {
    pub status: BackendStatus,
    /// Resource or detail the backend attached to the failure.
    pub context: Option<String>,
}

impl BackendError {
    pub fn new(status: BackendStatus) -> Self {
        Self {
            status,
            context: None,
        }
    }

    pub fn with_context(status: BackendStatus, context: impl Into<String>) -> Self {
        Self {
            status,
            context: Some(context.into()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BackendStatus::Cancelled
    }

    pub fn is_access_denied(&self) -> bool {
        self.status == BackendStatus::AccessDenied
    }
}

/// `SANE_Device`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub kind: String,
}

/// Opaque reference to an open backend device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u32);

/// Username and password answered to an authentication request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Frame format of one read pass (`SANE_Frame`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    Gray,
    Rgb,
    Red,
    Green,
    Blue,
}

impl FrameFormat {
    /// Whether the frame carries a single colour plane.
    pub fn is_plane(self) -> bool {
        matches!(self, FrameFormat::Red | FrameFormat::Green | FrameFormat::Blue)
    }
}

/// `SANE_Parameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    pub format: FrameFormat,
    pub last_frame: bool,
    pub bytes_per_line: usize,
    pub pixels_per_line: usize,
    /// Negative when the length is not known in advance.
    pub lines: i32,
    pub depth: u32,
}

/// Info bits returned by `set_option`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetInfo {
    pub inexact: bool,
    pub reload_options: bool,
    pub reload_params: bool,
}

impl SetInfo {
    pub fn merge(self, other: SetInfo) -> SetInfo {
        SetInfo {
            inexact: self.inexact || other.inexact,
            reload_options: self.reload_options || other.reload_options,
            reload_params: self.reload_params || other.reload_params,
        }
    }
}

/// Abstract scanner backend interface.
///
/// This trait enables:
/// - Production implementation over a SANE library
/// - The simulated backend used by the CLI and tests
pub trait Backend: Send + Sync {
    /// List attached devices.
    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError>;

    /// Open a device. Fails with `AccessDenied` (context = resource) when
    /// credentials are required and missing or wrong.
    fn open(&self, name: &str, credentials: Option<&Credentials>)
    -> Result<HandleId, BackendError>;

    fn close(&self, handle: HandleId);

    /// Descriptor of option `index`; index 0 is the option count and
    /// real options start at 1. `None` past the end.
    fn option_descriptor(&self, handle: HandleId, index: usize) -> Option<OptionDescriptor>;

    fn get_option(&self, handle: HandleId, index: usize) -> Result<OptionValue, BackendError>;

    /// Set an option; returns the value the backend actually applied.
    fn set_option(
        &self,
        handle: HandleId,
        index: usize,
        value: OptionValue,
    ) -> Result<(OptionValue, SetInfo), BackendError>;

    /// Let the backend pick the value (`SANE_ACTION_SET_AUTO`).
    fn set_auto(&self, handle: HandleId, index: usize) -> Result<SetInfo, BackendError>;

    /// Start acquiring the next frame.
    fn start(&self, handle: HandleId) -> Result<(), BackendError>;

    fn parameters(&self, handle: HandleId) -> Result<Parameters, BackendError>;

    /// Read frame data into `buf`. `Ok(None)` marks the end of the frame.
    fn read(&self, handle: HandleId, buf: &mut [u8]) -> Result<Option<usize>, BackendError>;

    /// Cancel or finish the current acquisition.
    fn cancel(&self, handle: HandleId);
}
