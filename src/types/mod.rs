//! Core types for composed and encoded messages.
//!
//! This module provides:
//! - The composed [`Message`] with its [`Body`] and [`Attachment`]s
//! - The SMTP [`Envelope`] derived from a message
//! - The wire-ready [`EncodedMessage`] and the [`SendResult`] of a delivery

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::FormattedAddress;

/// Content type of a text body part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `text/plain`.
    Plain,
    /// `text/html`.
    Html,
}

impl BodyKind {
    /// Returns the MIME type string.
    pub fn mime_type(&self) -> &'static str {
        match self {
            BodyKind::Plain => "text/plain; charset=UTF-8",
            BodyKind::Html => "text/html; charset=UTF-8",
        }
    }
}

/// A single text part of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Content type.
    pub kind: BodyKind,
    /// Text content, verbatim.
    pub content: String,
}

/// Message body: exactly one primary part and an optional alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    /// The part a client renders by default.
    pub primary: BodyPart,
    /// A richer representation offered alongside the primary part.
    pub alternative: Option<BodyPart>,
}

impl Body {
    /// Creates a body with a plain text primary part.
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            primary: BodyPart {
                kind: BodyKind::Plain,
                content: content.into(),
            },
            alternative: None,
        }
    }

    /// Creates a body with an HTML primary part.
    pub fn html(content: impl Into<String>) -> Self {
        Self {
            primary: BodyPart {
                kind: BodyKind::Html,
                content: content.into(),
            },
            alternative: None,
        }
    }

    /// Adds an HTML alternative to the primary part.
    pub fn with_html_alternative(mut self, content: impl Into<String>) -> Self {
        self.alternative = Some(BodyPart {
            kind: BodyKind::Html,
            content: content.into(),
        });
        self
    }
}

/// A file to attach, read only when the message is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    path: PathBuf,
}

impl Attachment {
    /// Creates an attachment for the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name used in the MIME headers.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Returns the content type guessed from the file extension.
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .to_string()
    }
}

/// A fully composed message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Sender address.
    pub from: FormattedAddress,
    /// Reply-to address.
    pub reply_to: Option<FormattedAddress>,
    /// Primary recipients.
    pub to: Vec<FormattedAddress>,
    /// CC recipients.
    pub cc: Vec<FormattedAddress>,
    /// BCC recipients.
    pub bcc: Vec<FormattedAddress>,
    /// Subject, possibly empty.
    pub subject: String,
    /// Body.
    pub body: Body,
    /// File attachments, in order.
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Returns all recipients (to + cc + bcc).
    pub fn all_recipients(&self) -> impl Iterator<Item = &FormattedAddress> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Returns true if the message has any attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Builds the SMTP envelope for this message.
    pub fn envelope(&self) -> Envelope {
        Envelope {
            from: self.from.address().to_string(),
            recipients: self
                .all_recipients()
                .map(|addr| addr.address().to_string())
                .collect(),
        }
    }
}

/// SMTP envelope: MAIL FROM and RCPT TO addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path.
    pub from: String,
    /// Forward paths, in header order (to, cc, bcc).
    pub recipients: Vec<String>,
}

/// A message serialized to RFC 5322 bytes.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    /// Message-ID header value, without angle brackets.
    pub message_id: String,
    /// SMTP envelope.
    pub envelope: Envelope,
    /// Serialized message with CRLF line endings (not dot-stuffed).
    pub data: Vec<u8>,
}

/// Result of a successful delivery.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Message-ID of the delivered message.
    pub message_id: String,
    /// Recipients accepted by the relay.
    pub accepted: Vec<String>,
    /// Final server response to the message data.
    pub response: String,
    /// Send duration.
    pub duration: Duration,
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message {} accepted for {} recipient(s): {}",
            self.message_id,
            self.accepted.len(),
            self.response
        )
    }
}
