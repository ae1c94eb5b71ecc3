//! Message composition from resolved configuration fields.
//!
//! Addresses are formatted under the configured [`ParsingPolicy`]: strict
//! composition stops at the first malformed address, lenient composition
//! drops it and records an [`AddressWarning`]. The body and attachment list
//! are taken as given; attachment paths are not touched until the message is
//! encoded.

use std::env;

use crate::address::{self, FormattedAddress};
use crate::errors::{AddressError, ComposeError};
use crate::recipients::{self, AddressWarning, ParsingPolicy, RecipientRole};
use crate::types::{Attachment, Body, Message};

const FALLBACK_USER: &str = "user";
const FALLBACK_HOST: &str = "localhost";

/// Raw message fields as resolved from flags, environment and config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFields {
    /// From address; empty means "use the local default".
    pub from: String,
    /// Reply-To address; empty means no header.
    pub reply_to: String,
    /// Primary recipients.
    pub to: Vec<String>,
    /// CC recipients.
    pub cc: Vec<String>,
    /// BCC recipients.
    pub bcc: Vec<String>,
    /// Subject.
    pub subject: String,
    /// Plain text body.
    pub message: String,
    /// HTML body; empty means none.
    pub html_message: String,
    /// Paths of files to attach.
    pub attachments: Vec<String>,
}

/// The local user and host used to synthesize a sender address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Login name.
    pub username: String,
    /// Host name.
    pub hostname: String,
}

impl LocalIdentity {
    /// Creates an identity from explicit values.
    pub fn new(username: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
        }
    }

    /// Reads the login name from the environment and the host name from the OS.
    pub fn detect() -> Self {
        let username = ["USER", "LOGNAME", "USERNAME"]
            .iter()
            .find_map(|key| env::var(key).ok().filter(|value| !value.is_empty()))
            .unwrap_or_else(|| FALLBACK_USER.to_string());

        let hostname = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                tracing::debug!(error = %e, "Could not read host name");
                FALLBACK_HOST.to_string()
            }
        };

        Self { username, hostname }
    }

    /// Returns `username@hostname`, with characters that cannot appear in an
    /// address removed.
    pub fn default_address(&self) -> String {
        let username: String = self
            .username
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(*c))
            .collect::<String>()
            .trim_matches('.')
            .to_string();
        let hostname: String = self
            .hostname
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
            .collect::<String>()
            .trim_matches('.')
            .to_string();

        let username = if username.is_empty() || username.contains("..") {
            FALLBACK_USER.to_string()
        } else {
            username
        };
        let hostname = if hostname.is_empty() || hostname.contains("..") {
            FALLBACK_HOST.to_string()
        } else {
            hostname
        };

        format!("{}@{}", username, hostname)
    }
}

/// A composed message plus the warnings for addresses dropped on the way.
#[derive(Debug, Clone)]
pub struct Composed {
    /// The message.
    pub message: Message,
    /// Addresses dropped under the lenient policy.
    pub warnings: Vec<AddressWarning>,
}

/// Builds a [`Message`] from [`MessageFields`].
#[derive(Debug, Clone)]
pub struct MessageComposer {
    policy: ParsingPolicy,
    identity: LocalIdentity,
}

impl MessageComposer {
    /// Creates a composer that synthesizes the default sender from the local
    /// user and host.
    pub fn new(policy: ParsingPolicy) -> Self {
        Self {
            policy,
            identity: LocalIdentity::detect(),
        }
    }

    /// Overrides the identity used for the default sender.
    pub fn with_identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Composes the message, or returns the first address failure that the
    /// strict policy refuses to skip.
    pub fn compose(&self, fields: &MessageFields) -> Result<Composed, ComposeError> {
        let mut warnings = Vec::new();

        let (from, warning) =
            recipients::resolve_single(Some(fields.from.as_str()), RecipientRole::From, self.policy)
                .map_err(abort(RecipientRole::From))?;
        warnings.extend(warning);
        let from = match from {
            Some(from) => from,
            None => self.default_sender()?,
        };
        tracing::debug!(from = %from, "Using sender");

        let (reply_to, warning) = recipients::resolve_single(
            Some(fields.reply_to.as_str()),
            RecipientRole::ReplyTo,
            self.policy,
        )
        .map_err(abort(RecipientRole::ReplyTo))?;
        warnings.extend(warning);
        if let Some(reply_to) = &reply_to {
            tracing::debug!(reply_to = %reply_to, "Setting reply-to");
        }

        let mut lists = Vec::with_capacity(3);
        for (inputs, role) in [
            (&fields.to, RecipientRole::To),
            (&fields.cc, RecipientRole::Cc),
            (&fields.bcc, RecipientRole::Bcc),
        ] {
            let resolved = recipients::resolve(inputs, role, self.policy).map_err(abort(role))?;
            if !resolved.addresses.is_empty() {
                tracing::debug!(
                    role = %role,
                    count = resolved.addresses.len(),
                    "Adding recipients"
                );
            }
            warnings.extend(resolved.warnings);
            lists.push(resolved.addresses);
        }
        let mut lists = lists.into_iter();
        let to = lists.next().unwrap_or_default();
        let cc = lists.next().unwrap_or_default();
        let bcc = lists.next().unwrap_or_default();

        let attachments = fields
            .attachments
            .iter()
            .filter(|path| !path.trim().is_empty())
            .map(Attachment::new)
            .collect();

        let message = Message {
            from,
            reply_to,
            to,
            cc,
            bcc,
            subject: fields.subject.clone(),
            body: compose_body(&fields.message, &fields.html_message),
            attachments,
        };

        Ok(Composed { message, warnings })
    }

    fn default_sender(&self) -> Result<FormattedAddress, ComposeError> {
        address::format(&self.identity.default_address()).map_err(|source| ComposeError {
            role: RecipientRole::From,
            source,
        })
    }
}

fn abort(role: RecipientRole) -> impl FnOnce(AddressError) -> ComposeError {
    move |source| ComposeError { role, source }
}

/// Chooses the primary body and optional HTML alternative.
///
/// HTML becomes the primary body only when there is no plain text; otherwise
/// it is offered as an alternative to the plain text.
fn compose_body(plain: &str, html: &str) -> Body {
    if html.is_empty() {
        Body::plain(plain)
    } else if plain.is_empty() {
        Body::html(html)
    } else {
        Body::plain(plain).with_html_alternative(html)
    }
}
