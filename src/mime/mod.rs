//! MIME encoding for composed messages.
//!
//! Provides RFC 5322 message formatting with:
//! - Header encoding (RFC 2047) for non-ASCII subjects and display names
//! - Quoted-printable text parts and Base64 attachments
//! - multipart/alternative and multipart/mixed construction
//!
//! The Bcc list never appears in the headers; it only reaches the envelope.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::address::FormattedAddress;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::types::{Attachment, Body, BodyPart, EncodedMessage, Message};

/// MIME content types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// Multipart alternative (text + HTML).
    MultipartAlternative(String),
    /// Multipart mixed (body + attachments).
    MultipartMixed(String),
}

impl ContentType {
    /// Returns the MIME type string.
    pub fn mime_type(&self) -> String {
        match self {
            ContentType::MultipartAlternative(boundary) => {
                format!("multipart/alternative; boundary=\"{}\"", boundary)
            }
            ContentType::MultipartMixed(boundary) => {
                format!("multipart/mixed; boundary=\"{}\"", boundary)
            }
        }
    }
}

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// Quoted-printable encoding.
    #[default]
    QuotedPrintable,
    /// Base64 encoding.
    Base64,
}

impl TransferEncoding {
    /// Returns the header value.
    pub fn header_value(&self) -> &'static str {
        match self {
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
        }
    }
}

/// MIME encoder for composed messages.
pub struct MimeEncoder {
    /// Date for the message.
    date: DateTime<Utc>,
}

impl MimeEncoder {
    /// Creates a new encoder stamped with the current time.
    pub fn new() -> Self {
        Self { date: Utc::now() }
    }

    /// Overrides the Date header value.
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    /// Encodes a message to RFC 5322 format.
    ///
    /// Attachments are read from disk here; a missing or unreadable file
    /// fails the whole encoding before anything is sent.
    pub fn encode(&self, message: &Message) -> SmtpResult<EncodedMessage> {
        let mut output = Vec::new();
        let message_id = self.generate_message_id(message.from.domain());

        self.write_header(&mut output, "Date", &self.format_date())?;
        self.write_header(&mut output, "From", &encode_address(&message.from))?;

        if let Some(reply_to) = &message.reply_to {
            self.write_header(&mut output, "Reply-To", &encode_address(reply_to))?;
        }

        if !message.to.is_empty() {
            self.write_header(&mut output, "To", &encode_address_list(&message.to))?;
        }

        if !message.cc.is_empty() {
            self.write_header(&mut output, "Cc", &encode_address_list(&message.cc))?;
        }

        self.write_header(&mut output, "Subject", &encode_header(&message.subject))?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;
        self.write_header(&mut output, "MIME-Version", "1.0")?;

        if message.has_attachments() {
            let mixed_boundary = self.generate_boundary();
            self.write_header(
                &mut output,
                "Content-Type",
                &ContentType::MultipartMixed(mixed_boundary.clone()).mime_type(),
            )?;
            output.extend_from_slice(b"\r\n");

            output.extend_from_slice(format!("--{}\r\n", mixed_boundary).as_bytes());
            self.write_body(&mut output, &message.body)?;
            output.extend_from_slice(b"\r\n");

            for attachment in &message.attachments {
                output.extend_from_slice(format!("--{}\r\n", mixed_boundary).as_bytes());
                self.write_attachment(&mut output, attachment)?;
            }

            output.extend_from_slice(format!("--{}--\r\n", mixed_boundary).as_bytes());
        } else {
            self.write_body(&mut output, &message.body)?;
        }

        Ok(EncodedMessage {
            message_id,
            envelope: message.envelope(),
            data: output,
        })
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
        if name.chars().any(|c| c.is_control() || c == ':') {
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidHeader,
                format!("Invalid header name: {}", name),
            ));
        }
        if value.contains(['\r', '\n']) {
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidHeader,
                format!("Line break in {} header", name),
            ));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Writes the body: a single text part, or multipart/alternative.
    fn write_body(&self, output: &mut Vec<u8>, body: &Body) -> SmtpResult<()> {
        match &body.alternative {
            None => self.write_text_part(output, &body.primary),
            Some(alternative) => {
                let alt_boundary = self.generate_boundary();
                self.write_header(
                    output,
                    "Content-Type",
                    &ContentType::MultipartAlternative(alt_boundary.clone()).mime_type(),
                )?;
                output.extend_from_slice(b"\r\n");

                // Least preferred representation first (RFC 2046 5.1.4).
                for part in [&body.primary, alternative] {
                    output.extend_from_slice(format!("--{}\r\n", alt_boundary).as_bytes());
                    self.write_text_part(output, part)?;
                    output.extend_from_slice(b"\r\n");
                }

                output.extend_from_slice(format!("--{}--\r\n", alt_boundary).as_bytes());
                Ok(())
            }
        }
    }

    fn write_text_part(&self, output: &mut Vec<u8>, part: &BodyPart) -> SmtpResult<()> {
        self.write_header(output, "Content-Type", part.kind.mime_type())?;
        self.write_header(
            output,
            "Content-Transfer-Encoding",
            TransferEncoding::QuotedPrintable.header_value(),
        )?;
        output.extend_from_slice(b"\r\n");
        output.extend_from_slice(&encode_quoted_printable(&part.content));
        Ok(())
    }

    /// Writes an attachment, reading its content from disk.
    fn write_attachment(&self, output: &mut Vec<u8>, attachment: &Attachment) -> SmtpResult<()> {
        let data = std::fs::read(attachment.path()).map_err(|e| {
            SmtpError::message_error(
                SmtpErrorKind::AttachmentError,
                format!("could not read {}: {}", attachment.path().display(), e),
            )
            .with_cause(e)
        })?;
        tracing::debug!(
            path = %attachment.path().display(),
            bytes = data.len(),
            "Attaching file"
        );

        let filename = encode_parameter(&attachment.filename());
        self.write_header(
            output,
            "Content-Type",
            &format!("{}; name=\"{}\"", attachment.content_type(), filename),
        )?;
        self.write_header(
            output,
            "Content-Transfer-Encoding",
            TransferEncoding::Base64.header_value(),
        )?;
        self.write_header(
            output,
            "Content-Disposition",
            &format!("attachment; filename=\"{}\"", filename),
        )?;
        output.extend_from_slice(b"\r\n");

        // Base64 encode with line wrapping
        let encoded = BASE64.encode(&data);
        for chunk in encoded.as_bytes().chunks(76) {
            output.extend_from_slice(chunk);
            output.extend_from_slice(b"\r\n");
        }

        Ok(())
    }

    /// Generates a unique message ID.
    fn generate_message_id(&self, domain: &str) -> String {
        let domain = if domain.is_empty() { "localhost" } else { domain };
        format!("{}.{}@{}", Uuid::new_v4(), self.date.timestamp(), domain)
    }

    /// Generates a unique boundary.
    fn generate_boundary(&self) -> String {
        format!("----=_Part_{}", Uuid::new_v4().simple())
    }

    /// Formats the date for the Date header.
    fn format_date(&self) -> String {
        self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }

    /// Prepares the DATA content with dot-stuffing.
    pub fn prepare_data_content(encoded_email: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded_email.len() + 100);
        let mut at_line_start = true;

        for &byte in encoded_email {
            if at_line_start && byte == b'.' {
                output.push(b'.');
            }

            output.push(byte);
            at_line_start = byte == b'\n';
        }

        if !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        // End with <CRLF>.<CRLF>
        output.extend_from_slice(b".\r\n");

        output
    }
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest line allowed by RFC 5322, excluding the CRLF.
const MAX_LINE_LEN: usize = 998;

/// Target width of a folded header line.
const FOLD_WIDTH: usize = 76;

/// Raw bytes per RFC 2047 word: `=?UTF-8?B?` plus 60 base64 characters
/// plus `?=` stays within the 75 character limit.
const ENCODED_WORD_CHUNK: usize = 45;

/// Folds a header line at 78 characters on whitespace.
///
/// The first word of the value stays on the `Name:` line. A word too long
/// for any line is hard-wrapped at [`MAX_LINE_LEN`].
fn fold_header(header: &str) -> String {
    if header.len() <= 78 {
        return header.to_string();
    }

    let mut result = String::new();
    let mut current_line = String::new();

    for (index, word) in header.split(' ').enumerate() {
        if index == 0 {
            current_line.push_str(word);
        } else if index == 1 || current_line.len() + 1 + word.len() <= FOLD_WIDTH {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            push_line(&mut result, &current_line);
            result.push_str("\r\n ");
            current_line = word.to_string();
        }
    }

    push_line(&mut result, &current_line);
    result
}

/// Appends `line`, breaking it at character boundaries so that no physical
/// line, continuation space included, exceeds [`MAX_LINE_LEN`].
fn push_line(result: &mut String, line: &str) {
    let mut start = 0;
    for (index, c) in line.char_indices() {
        if index + c.len_utf8() - start > MAX_LINE_LEN - 1 {
            result.push_str(&line[start..index]);
            result.push_str("\r\n ");
            start = index;
        }
    }
    result.push_str(&line[start..]);
}

/// Encodes a header value using RFC 2047 when it is not plain printable ASCII.
///
/// Long values become several encoded words separated by spaces, split on
/// character boundaries.
fn encode_header(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk_start = 0;
    for (index, c) in value.char_indices() {
        if index + c.len_utf8() - chunk_start > ENCODED_WORD_CHUNK {
            words.push(encoded_word(&value[chunk_start..index]));
            chunk_start = index;
        }
    }
    words.push(encoded_word(&value[chunk_start..]));
    words.join(" ")
}

fn encoded_word(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64.encode(text.as_bytes()))
}

/// Formats an address for a header, encoding a non-ASCII display name.
fn encode_address(address: &FormattedAddress) -> String {
    match address.name() {
        Some(name) if !name.is_ascii() => {
            format!("{} <{}>", encode_header(name), address.address())
        }
        _ => address.to_header(),
    }
}

fn encode_address_list(addresses: &[FormattedAddress]) -> String {
    addresses
        .iter()
        .map(encode_address)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Encodes a quoted MIME parameter value such as a file name.
fn encode_parameter(value: &str) -> String {
    let encoded = encode_header(value);
    if encoded != value {
        return encoded;
    }
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Encodes text as quoted-printable after normalizing line endings to CRLF.
fn encode_quoted_printable(text: &str) -> Vec<u8> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n");
    quoted_printable::encode(normalized.as_bytes())
}
