//! # email-cli
//!
//! Send a single email from the command line through an SMTP relay.
//!
//! - RFC 5322 mailbox parsing with a strict or lenient policy for malformed
//!   addresses
//! - Plain text, HTML or multipart/alternative bodies with attachments
//! - Anonymous or authenticated delivery (PLAIN, LOGIN, CRAM-MD5)
//! - Opportunistic STARTTLS or implicit TLS
//! - Layered configuration: flags, `EMAIL_*` environment variables, a
//!   YAML/JSON config file, built-in defaults
//!
//! ## Library use
//!
//! ```rust,no_run
//! use email_cli::compose::{MessageComposer, MessageFields};
//! use email_cli::dialer::Dialer;
//! use email_cli::mime::MimeEncoder;
//! use email_cli::recipients::ParsingPolicy;
//! use email_cli::SmtpConfig;
//!
//! # async fn send() -> Result<(), Box<dyn std::error::Error>> {
//! let fields = MessageFields {
//!     from: "\"Sender\" <sender@example.com>".to_string(),
//!     to: vec!["recipient@example.com".to_string()],
//!     subject: "Hello".to_string(),
//!     message: "This is a test email.".to_string(),
//!     ..Default::default()
//! };
//!
//! let composed = MessageComposer::new(ParsingPolicy::Strict).compose(&fields)?;
//! let encoded = MimeEncoder::new().encode(&composed.message)?;
//!
//! let config = SmtpConfig::builder().host("smtp.example.com").port(587).build()?;
//! let result = Dialer::from_config(&config).send(&encoded).await?;
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Addresses and composition
pub mod address;
pub mod compose;
pub mod recipients;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Delivery
pub mod dialer;

// Command line
pub mod app;
pub mod cli;
pub mod input;

// Observability
pub mod observability;

// Mocks for testing
#[cfg(test)]
pub mod mocks;

// Re-exports for convenience
pub use address::FormattedAddress;
pub use config::{Config, SmtpConfig, SmtpConfigBuilder, TlsMode};
pub use dialer::{DialMode, Dialer};
pub use errors::{RunError, SmtpError, SmtpErrorKind, SmtpResult};
pub use recipients::ParsingPolicy;
pub use types::{Attachment, Body, EncodedMessage, Envelope, Message, SendResult};
