//! SMTP protocol primitives.
//!
//! Implements the RFC 5321 commands the dialer issues, reply parsing, and
//! the ESMTP capability set advertised in response to EHLO.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Reverse path, including angle brackets.
        address: String,
        /// SIZE parameter, sent only when the server advertises SIZE.
        size: Option<usize>,
    },
    /// RCPT TO command.
    RcptTo {
        /// Forward path, including angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Reset transaction.
    Rset,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::MailFrom { address, size } => match size {
                Some(size) => format!("MAIL FROM:{} SIZE={}", address, size),
                None => format!("MAIL FROM:{}", address),
            },
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Returns the command as it may appear in logs.
    ///
    /// AUTH initial responses carry credentials and are masked.
    pub fn redacted(&self) -> String {
        match self {
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(_),
            } => format!("AUTH {} ****", mechanism),
            other => other.to_smtp_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_smtp_string())
    }
}

/// SMTP reply from the server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Reply text, one entry per line.
    pub message: Vec<String>,
    /// Whether this is a multiline reply.
    pub is_multiline: bool,
}

impl SmtpResponse {
    /// Creates a single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
            is_multiline: false,
        }
    }

    /// Creates a multiline reply (EHLO style).
    pub fn multiline<I, S>(code: u16, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let message: Vec<String> = lines.into_iter().map(Into::into).collect();
        Self {
            code,
            enhanced_code: None,
            is_multiline: message.len() > 1,
            message,
        }
    }

    /// Parses a reply from raw lines (without line terminators).
    pub fn parse(lines: &[String]) -> SmtpResult<Self> {
        if lines.is_empty() {
            return Err(SmtpError::protocol("Empty response"));
        }

        let mut messages = Vec::with_capacity(lines.len());
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| SmtpError::protocol(format!("Invalid status code: {}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(SmtpError::protocol(
                    "Inconsistent status codes in multiline response",
                ));
            }

            let text = line.get(4..).unwrap_or_default();
            let text = match (i, Self::parse_enhanced_code(text)) {
                (0, Some((esc, rest))) => {
                    enhanced_code = Some(esc);
                    rest.trim().to_string()
                }
                _ => text.to_string(),
            };

            messages.push(text);
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
            is_multiline: lines.len() > 1,
        })
    }

    /// Parses an enhanced status code from the start of the reply text.
    fn parse_enhanced_code(text: &str) -> Option<(EnhancedStatusCode, &str)> {
        let (first, rest) = text.split_once(' ').unwrap_or((text, ""));
        let code = EnhancedStatusCode::parse(first)?;
        Some((code, rest))
    }

    /// Returns true if this is a success reply (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts the reply into an error.
    pub fn to_error(&self) -> SmtpError {
        let mut err = SmtpError::from_smtp_response(self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP server capabilities.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size; `None` or zero means no limit was advertised.
    pub size: Option<usize>,
    /// Whether the server advertised AUTH at all.
    pub auth: bool,
    /// Recognized authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS supported.
    pub starttls: bool,
    /// Enhanced status codes supported.
    pub enhanced_status_codes: bool,
}

impl EsmtpCapabilities {
    /// Parses capabilities from an EHLO reply.
    ///
    /// The first line is the server's domain and greeting, not a capability.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();
            let (capability, params) = line
                .split_once([' ', '='])
                .unwrap_or((line.as_str(), ""));

            match capability {
                "SIZE" => {
                    caps.size = params.trim().parse().ok();
                }
                "AUTH" => {
                    caps.auth = true;
                    for mech in params.split_whitespace() {
                        if let Some(method) = AuthMethod::from_capability(mech) {
                            caps.auth_mechanisms.insert(method);
                        }
                    }
                }
                "STARTTLS" => {
                    caps.starttls = true;
                }
                "ENHANCEDSTATUSCODES" => {
                    caps.enhanced_status_codes = true;
                }
                _ => {}
            }
        }

        caps
    }

    /// Returns true if authentication is available.
    pub fn has_auth(&self) -> bool {
        self.auth
    }

    /// Returns the advertised size limit, if any.
    pub fn size_limit(&self) -> Option<usize> {
        self.size.filter(|&size| size > 0)
    }
}

/// Reply codes the dialer checks for.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// User not local; will forward.
    pub const WILL_FORWARD: u16 = 251;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Command not implemented.
    pub const NOT_IMPLEMENTED: u16 = 502;
}
