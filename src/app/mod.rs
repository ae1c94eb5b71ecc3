//! One invocation of the command: compose, encode, send, echo.

use std::io::Write;

use crate::compose::{MessageComposer, MessageFields};
use crate::config::Config;
use crate::dialer::Dialer;
use crate::errors::RunError;
use crate::mime::MimeEncoder;
use crate::observability::Timer;
use crate::types::SendResult;

/// Sends one message built from `config` with `body` as the plain text, then
/// writes the serialized message to `out`.
///
/// Nothing touches the network when composition or encoding fails.
pub async fn run<W: Write>(
    config: &Config,
    body: String,
    out: &mut W,
) -> Result<SendResult, RunError> {
    let fields = MessageFields {
        message: body,
        ..config.email.clone()
    };

    let composer = MessageComposer::new(config.policy());
    let composed = composer.compose(&fields).map_err(|e| {
        tracing::warn!(
            role = %e.role,
            input = %e.source.input,
            "Could not parse address: {}",
            e.source.kind
        );
        tracing::error!("Will not send email");
        RunError::Compose(e)
    })?;
    if !composed.warnings.is_empty() {
        tracing::debug!(dropped = composed.warnings.len(), "Skipped malformed addresses");
    }

    let message = composed.message;
    let encoded = MimeEncoder::new()
        .encode(&message)
        .map_err(RunError::Attachment)?;
    tracing::debug!(
        message_id = %encoded.message_id,
        recipients = encoded.envelope.recipients.len(),
        attachments = message.attachments.len(),
        size = encoded.data.len(),
        "Message encoded"
    );

    let timer = Timer::start("send");
    let dialer = Dialer::from_config(&config.smtp);
    let result = dialer.send(&encoded).await.map_err(RunError::Transport)?;
    timer.stop();
    tracing::debug!(result = %result, "Sent");

    out.write_all(&encoded.data)
        .and_then(|_| out.flush())
        .map_err(RunError::Echo)?;

    Ok(result)
}
