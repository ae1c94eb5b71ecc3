//! Error types for the email client.
//!
//! Errors fall into four families:
//! - [`AddressError`]: a single malformed mailbox string
//! - [`ComposeError`]: an address error that blocked message composition
//! - [`SmtpError`]: dial, TLS, authentication or SMTP transaction failures
//! - [`RunError`]: everything the command can fail with, mapped to exit codes

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::recipients::RecipientRole;

/// Result type for SMTP operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// SMTP error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Connection errors
    /// Connection was refused or could not be established.
    ConnectionRefused,
    /// Connection was reset.
    ConnectionReset,
    /// Connect timed out.
    ConnectTimeout,
    /// Read timed out.
    ReadTimeout,
    /// Write timed out.
    WriteTimeout,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// STARTTLS not supported by server.
    StarttlsNotSupported,

    // Authentication errors
    /// Credentials are invalid.
    CredentialsInvalid,
    /// Authentication method not supported.
    AuthMethodNotSupported,
    /// Authentication is required.
    AuthenticationRequired,

    // Protocol errors
    /// Invalid response from server.
    InvalidResponse,
    /// Unexpected response code.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,

    // Message errors
    /// Sender address rejected.
    InvalidFromAddress,
    /// Recipient address rejected.
    InvalidRecipientAddress,
    /// Message exceeds size limit.
    MessageTooLarge,
    /// Invalid header format.
    InvalidHeader,
    /// Attachment could not be read.
    AttachmentError,

    // Configuration errors
    /// Configuration is invalid.
    ConfigurationInvalid,

    /// Unknown or internal error.
    Unknown,
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SmtpErrorKind::ConnectionReset => write!(f, "Connection reset"),
            SmtpErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            SmtpErrorKind::ReadTimeout => write!(f, "Read timeout"),
            SmtpErrorKind::WriteTimeout => write!(f, "Write timeout"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            SmtpErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SmtpErrorKind::AuthMethodNotSupported => write!(f, "Auth method not supported"),
            SmtpErrorKind::AuthenticationRequired => write!(f, "Authentication required"),
            SmtpErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            SmtpErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
            SmtpErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            SmtpErrorKind::InvalidFromAddress => write!(f, "Invalid sender address"),
            SmtpErrorKind::InvalidRecipientAddress => write!(f, "Invalid recipient address"),
            SmtpErrorKind::MessageTooLarge => write!(f, "Message too large"),
            SmtpErrorKind::InvalidHeader => write!(f, "Invalid header"),
            SmtpErrorKind::AttachmentError => write!(f, "Attachment error"),
            SmtpErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            SmtpErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !matches!(class, 2 | 4 | 5) {
            return None;
        }
        Some(Self { class, subject, detail })
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// SMTP error with detailed information.
#[derive(Error, Debug)]
pub struct SmtpError {
    kind: SmtpErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new SMTP error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP status code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP status code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::CredentialsInvalid, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates a message error.
    pub fn message_error(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates an error from an SMTP response.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            500..=503 => SmtpErrorKind::InvalidResponse,
            530 => SmtpErrorKind::AuthenticationRequired,
            535 => SmtpErrorKind::CredentialsInvalid,
            550 => SmtpErrorKind::InvalidRecipientAddress,
            552 => SmtpErrorKind::MessageTooLarge,
            553 => SmtpErrorKind::InvalidFromAddress,
            400..=599 => SmtpErrorKind::UnexpectedResponse,
            _ => SmtpErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

/// Why a mailbox string failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressErrorKind {
    /// Input was empty or only whitespace.
    NoAddress,
    /// No `@` separating local part and domain.
    MissingAt,
    /// More than one `@` outside a quoted local part.
    MultipleAt,
    /// Local part is empty or not a dot-atom / quoted string.
    InvalidLocalPart,
    /// Local part longer than 64 octets.
    LocalPartTooLong,
    /// Domain is empty or not a dot-atom / domain literal.
    InvalidDomain,
    /// Address longer than 254 octets.
    AddressTooLong,
    /// `<` without a matching `>`.
    UnclosedAngleAddr,
    /// A quoted string was not terminated.
    UnclosedQuotedString,
    /// The display name contains characters outside the phrase grammar.
    InvalidDisplayName,
    /// Input continues after a complete mailbox.
    TrailingCharacters(String),
    /// A character that is not allowed at that position.
    InvalidCharacter(char),
}

impl fmt::Display for AddressErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressErrorKind::NoAddress => write!(f, "no address"),
            AddressErrorKind::MissingAt => write!(f, "missing @ in addr-spec"),
            AddressErrorKind::MultipleAt => write!(f, "more than one @ in addr-spec"),
            AddressErrorKind::InvalidLocalPart => write!(f, "invalid local part"),
            AddressErrorKind::LocalPartTooLong => write!(f, "local part longer than 64 characters"),
            AddressErrorKind::InvalidDomain => write!(f, "invalid domain"),
            AddressErrorKind::AddressTooLong => write!(f, "address longer than 254 characters"),
            AddressErrorKind::UnclosedAngleAddr => write!(f, "unclosed angle-addr"),
            AddressErrorKind::UnclosedQuotedString => write!(f, "unclosed quoted-string"),
            AddressErrorKind::InvalidDisplayName => write!(f, "invalid display name"),
            AddressErrorKind::TrailingCharacters(rest) => {
                write!(f, "expected single address, found {:?}", rest)
            }
            AddressErrorKind::InvalidCharacter(c) => write!(f, "invalid character {:?}", c),
        }
    }
}

/// A mailbox string that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not parse address '{input}': {kind}")]
pub struct AddressError {
    /// The original input, untouched.
    pub input: String,
    /// Parser diagnostic.
    pub kind: AddressErrorKind,
}

impl AddressError {
    /// Creates an address error for the given input.
    pub fn new(input: impl Into<String>, kind: AddressErrorKind) -> Self {
        Self {
            input: input.into(),
            kind,
        }
    }
}

/// Composition aborted by the strict parsing policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{role} header: {source}")]
pub struct ComposeError {
    /// Header slot the offending address was destined for.
    pub role: RecipientRole,
    /// The address failure that blocked composition.
    #[source]
    pub source: AddressError,
}

/// Configuration could not be loaded or is invalid.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("could not read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Config file could not be parsed.
    #[error("could not parse config file {path}: {message}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// A resolved value is invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a single invocation of the command can fail with.
#[derive(Error, Debug)]
pub enum RunError {
    /// Configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Piped standard input could not be read.
    #[error("failed to read piped data: {0}")]
    Stdin(#[source] io::Error),
    /// The strict parsing policy rejected an address.
    #[error(transparent)]
    Compose(#[from] ComposeError),
    /// An attachment could not be read while encoding the message.
    #[error("could not encode message: {0}")]
    Attachment(#[source] SmtpError),
    /// Dial, authentication or transmission failed.
    #[error("an error occurred when sending email: {0}")]
    Transport(#[source] SmtpError),
    /// The receipt could not be written to standard output.
    #[error("failed to write message to stdout: {0}")]
    Echo(#[source] io::Error),
}

/// Process exit codes.
pub mod exit_codes {
    /// Message sent and echoed.
    pub const SUCCESS: u8 = 0;
    /// Dial, TLS, authentication or SMTP failure.
    pub const TRANSPORT: u8 = 1;
    /// Standard input could not be read.
    pub const STDIN: u8 = 2;
    /// Strict parsing rejected an address; nothing was sent.
    pub const STRICT_ABORT: u8 = 3;
    /// An attachment could not be read; nothing was sent.
    pub const ATTACHMENT: u8 = 4;
    /// Usage or configuration error (EX_USAGE).
    pub const USAGE: u8 = 64;
}

impl RunError {
    /// Returns the process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => exit_codes::USAGE,
            RunError::Stdin(_) => exit_codes::STDIN,
            RunError::Compose(_) => exit_codes::STRICT_ABORT,
            RunError::Attachment(_) => exit_codes::ATTACHMENT,
            RunError::Transport(_) | RunError::Echo(_) => exit_codes::TRANSPORT,
        }
    }
}
