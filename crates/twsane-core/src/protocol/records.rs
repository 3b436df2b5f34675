//! Data-argument records exchanged through the entry point.

use super::constants::*;
use super::container::{Capability, Frame};
use super::fix32::Fix32;

/// `TW_VERSION`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub language: u16,
    pub country: u16,
    pub info: String,
}

/// `TW_IDENTITY`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub id: u32,
    pub version: Version,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub supported_groups: u32,
    pub manufacturer: String,
    pub product_family: String,
    pub product_name: String,
}

impl Identity {
    /// Identity of an application calling the source.
    pub fn application(product_name: impl Into<String>) -> Self {
        Self {
            protocol_major: TWON_PROTOCOLMAJOR,
            protocol_minor: TWON_PROTOCOLMINOR,
            supported_groups: DG_CONTROL | DG_IMAGE,
            product_name: product_name.into(),
            ..Default::default()
        }
    }
}

/// `TW_USERINTERFACE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserInterface {
    pub show_ui: bool,
    pub modal_ui: bool,
}

/// `TW_PENDINGXFERS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingXfers {
    pub count: u16,
}

/// `TW_SETUPMEMXFER`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupMemXfer {
    pub min_buf_size: u32,
    pub max_buf_size: u32,
    pub preferred: u32,
}

impl SetupMemXfer {
    pub const DONT_CARE: SetupMemXfer = SetupMemXfer {
        min_buf_size: TWON_DONTCARE32,
        max_buf_size: TWON_DONTCARE32,
        preferred: TWON_DONTCARE32,
    };
}

/// `TW_STATUS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub condition_code: u16,
}

/// `TW_IMAGEINFO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub x_resolution: Fix32,
    pub y_resolution: Fix32,
    pub image_width: i32,
    pub image_length: i32,
    pub samples_per_pixel: i16,
    pub bits_per_sample: [i16; 8],
    pub bits_per_pixel: i16,
    pub planar: bool,
    pub pixel_type: i16,
    pub compression: u16,
}

/// `TW_IMAGELAYOUT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageLayout {
    pub frame: Frame,
    pub document_number: u32,
    pub page_number: u32,
    pub frame_number: u32,
}

/// `TW_IMAGEMEMXFER`. The host supplies `memory` sized to the number of
/// bytes it is willing to take; the source fills a prefix of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMemXfer {
    pub compression: u16,
    pub bytes_per_row: u32,
    pub columns: u32,
    pub rows: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub bytes_written: u32,
    pub memory: Vec<u8>,
}

impl ImageMemXfer {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            memory: vec![0; len],
            ..Default::default()
        }
    }
}

/// Complete raster handed over by a native transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub bits_per_pixel: u16,
    pub pixel_type: u16,
    pub x_resolution: Fix32,
    pub y_resolution: Fix32,
    pub data: Vec<u8>,
}

/// `TW_ELEMENT8`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Element8 {
    pub index: u8,
    pub channel1: u8,
    pub channel2: u8,
    pub channel3: u8,
}

/// `TW_PALETTE8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette8 {
    pub num_colors: u16,
    pub palette_type: u16,
    pub colors: [Element8; 256],
}

impl Default for Palette8 {
    fn default() -> Self {
        Self {
            num_colors: 0,
            palette_type: TWPA_RGB,
            colors: [Element8::default(); 256],
        }
    }
}

/// Argument of one entry-point call. The variant must match the data
/// argument type named in the call.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Capability(Capability),
    Identity(Identity),
    PendingXfers(PendingXfers),
    SetupMemXfer(SetupMemXfer),
    Status(Status),
    UserInterface(UserInterface),
    XferGroup(u32),
    CustomData(Vec<u8>),
    ImageInfo(ImageInfo),
    ImageLayout(ImageLayout),
    ImageMemXfer(ImageMemXfer),
    ImageNativeXfer(Option<RasterImage>),
    Palette8(Box<Palette8>),
}

impl Payload {
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Capability(_) => "TW_CAPABILITY",
            Payload::Identity(_) => "TW_IDENTITY",
            Payload::PendingXfers(_) => "TW_PENDINGXFERS",
            Payload::SetupMemXfer(_) => "TW_SETUPMEMXFER",
            Payload::Status(_) => "TW_STATUS",
            Payload::UserInterface(_) => "TW_USERINTERFACE",
            Payload::XferGroup(_) => "TW_UINT32",
            Payload::CustomData(_) => "TW_CUSTOMDSDATA",
            Payload::ImageInfo(_) => "TW_IMAGEINFO",
            Payload::ImageLayout(_) => "TW_IMAGELAYOUT",
            Payload::ImageMemXfer(_) => "TW_IMAGEMEMXFER",
            Payload::ImageNativeXfer(_) => "TW_HANDLE",
            Payload::Palette8(_) => "TW_PALETTE8",
        }
    }
}

/// Result of an entry-point call (`TWRC_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    Failure,
    CheckStatus,
    XferDone,
}

impl ReturnCode {
    pub fn code(self) -> u16 {
        match self {
            ReturnCode::Success => TWRC_SUCCESS,
            ReturnCode::Failure => TWRC_FAILURE,
            ReturnCode::CheckStatus => TWRC_CHECKSTATUS,
            ReturnCode::XferDone => TWRC_XFERDONE,
        }
    }
}
