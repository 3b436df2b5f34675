use tracing::debug;

use super::{HandleResult, HandlerContext, wrong_payload};
use crate::backend::Backend;
use crate::capability::Translator;
use crate::error::TwainError;
use crate::events::{SourceEvent, SourceObserver};
use crate::protocol::Payload;

/// All capability messages.
pub fn handle_capability<B: Backend, O: SourceObserver>(
    ctx: &mut HandlerContext<'_, B, O>,
    msg: u16,
    payload: &mut Payload,
) -> Result<HandleResult, TwainError> {
    let Payload::Capability(cap) = payload else {
        return Err(wrong_payload(payload));
    };
    let info = Translator::new(&mut *ctx.devices, &mut ctx.state.settings).handle(msg, cap)?;
    debug!(cap = format_args!("0x{:04X}", cap.id), msg, "Capability handled");

    if info.reload_options {
        ctx.emit(SourceEvent::OptionsRebuilt);
    }
    Ok(if info.inexact {
        HandleResult::CheckStatus
    } else {
        HandleResult::Success
    })
}
