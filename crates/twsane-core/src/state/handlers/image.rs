//! Image group handlers.

use tracing::{debug, info};

use super::{HandleResult, HandlerContext, wrong_payload};
use crate::acquire::Image;
use crate::backend::Backend;
use crate::capability::{ScanRegion, area, current_resolution};
use crate::error::TwainError;
use crate::events::{SourceEvent, SourceObserver};
use crate::protocol::constants::MSG_GET;
use crate::protocol::{ImageLayout, Payload};
use crate::state::machine::TwainState;

fn front<'s, B: Backend, O: SourceObserver>(
    ctx: &'s mut HandlerContext<'_, B, O>,
) -> Result<&'s mut Image, TwainError> {
    ctx.state
        .queue
        .front_mut()
        .ok_or_else(|| TwainError::bad_protocol("no image pending"))
}

pub fn handle_image_info<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::ImageInfo(info) = payload else {
        return Err(wrong_payload(payload));
    };
    *info = front(ctx)?.info();
    Ok(HandleResult::Success)
}

/// ImageLayout Get / Set.
///
/// Get reports the geometry of the image just scanned when there is one,
/// otherwise the device's current area. Set moves the device's area.
pub fn handle_image_layout<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    msg: u16,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::ImageLayout(layout) = payload else {
        return Err(wrong_payload(payload));
    };
    let (x_res, y_res) = current_resolution(ctx.devices)?;

    if msg == MSG_GET {
        let frame = match ctx.state.scanned_layout {
            Some(frame) => frame,
            None => ScanRegion::read(ctx.devices)?.to_frame(x_res.to_f64(), y_res.to_f64()),
        };
        *layout = ImageLayout {
            frame,
            document_number: 1,
            page_number: 1,
            frame_number: 1,
        };
        return Ok(HandleResult::Success);
    }

    let requested = ScanRegion::read(ctx.devices)?.with_frame(
        &layout.frame,
        x_res.to_f64(),
        y_res.to_f64(),
    );
    let result = area::apply(ctx.devices, &requested)?;
    debug!(area = %requested.label(), inexact = result.inexact, "Layout set");
    if result.reload_options {
        ctx.emit(SourceEvent::OptionsRebuilt);
    }
    Ok(if result.inexact {
        HandleResult::CheckStatus
    } else {
        HandleResult::Success
    })
}

/// One memory transfer chunk of the pending image.
pub fn handle_mem_xfer<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::ImageMemXfer(xfer) = payload else {
        return Err(wrong_payload(payload));
    };
    let starting = ctx.state.state == TwainState::TransferReady;
    let image = front(ctx)?;
    if starting {
        image.rewind();
    }
    let done = image.next_chunk(xfer)?;
    if starting {
        info!("Memory transfer started");
        ctx.goto(TwainState::Transferring);
    }
    Ok(if done {
        HandleResult::XferDone
    } else {
        HandleResult::Success
    })
}

/// The whole pending image in one piece.
pub fn handle_native_xfer<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    if !matches!(payload, Payload::ImageNativeXfer(_)) {
        return Err(wrong_payload(payload));
    }
    let raster = front(ctx)?.take_raster();
    info!(
        width = raster.width,
        height = raster.height,
        "Native transfer"
    );
    *payload = Payload::ImageNativeXfer(Some(raster));
    ctx.goto(TwainState::Transferring);
    Ok(HandleResult::XferDone)
}

pub fn handle_palette<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    if !matches!(payload, Payload::Palette8(_)) {
        return Err(wrong_payload(payload));
    }
    *payload = Payload::Palette8(Box::new(front(ctx)?.palette()?));
    Ok(HandleResult::Success)
}
