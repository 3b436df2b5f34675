//! Protocol module - TWAIN wire definitions.

pub mod constants;
pub mod container;
pub mod fix32;
pub mod records;

pub use constants::*;
pub use container::{Capability, Container, ContainerError, Enumeration, Frame, Item, ItemType, Range};
pub use fix32::Fix32;
pub use records::{
    Element8, Identity, ImageInfo, ImageLayout, ImageMemXfer, Palette8, Payload, PendingXfers,
    RasterImage, ReturnCode, SetupMemXfer, Status, UserInterface, Version,
};
