//! Address list resolution under a strict or lenient parsing policy.

use std::fmt;

use crate::address::{self, FormattedAddress};
use crate::errors::AddressError;

/// How malformed addresses are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParsingPolicy {
    /// Any malformed address aborts the whole send.
    Strict,
    /// Malformed addresses are dropped with a warning.
    #[default]
    Lenient,
}

impl ParsingPolicy {
    /// Maps the `strict_parsing` flag to a policy.
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            ParsingPolicy::Strict
        } else {
            ParsingPolicy::Lenient
        }
    }
}

/// Header slot an address is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientRole {
    /// Sender.
    From,
    /// Reply-To (single address).
    ReplyTo,
    /// Primary recipients.
    To,
    /// Carbon copy.
    Cc,
    /// Blind carbon copy.
    Bcc,
}

impl RecipientRole {
    /// Returns the header name for this role.
    pub fn header_name(&self) -> &'static str {
        match self {
            RecipientRole::From => "From",
            RecipientRole::ReplyTo => "Reply-To",
            RecipientRole::To => "To",
            RecipientRole::Cc => "Cc",
            RecipientRole::Bcc => "Bcc",
        }
    }
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header_name())
    }
}

/// An address dropped under the lenient policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressWarning {
    /// Header slot the address was destined for.
    pub role: RecipientRole,
    /// The parse failure, including the original input.
    pub error: AddressError,
}

impl fmt::Display for AddressWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.error)
    }
}

/// Successfully formatted addresses plus the warnings for dropped ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    /// Formatted addresses in input order.
    pub addresses: Vec<FormattedAddress>,
    /// One warning per dropped input.
    pub warnings: Vec<AddressWarning>,
}

/// Formats every address in `inputs`, in order.
///
/// Under [`ParsingPolicy::Strict`] the first failure is returned and nothing
/// else. Under [`ParsingPolicy::Lenient`] failures are skipped and reported
/// as warnings; the output never contains a placeholder for them.
pub fn resolve<S: AsRef<str>>(
    inputs: &[S],
    role: RecipientRole,
    policy: ParsingPolicy,
) -> Result<Resolved, AddressError> {
    let mut resolved = Resolved::default();

    for input in inputs {
        match address::format(input.as_ref()) {
            Ok(formatted) => resolved.addresses.push(formatted),
            Err(error) if policy == ParsingPolicy::Strict => return Err(error),
            Err(error) => {
                tracing::warn!(
                    role = %role,
                    input = %error.input,
                    "Could not parse address: {}",
                    error.kind
                );
                resolved.warnings.push(AddressWarning { role, error });
            }
        }
    }

    Ok(resolved)
}

/// Formats a single optional address (Reply-To, From).
///
/// `None` or an empty string means the header was not configured and is not
/// an error under either policy.
pub fn resolve_single(
    input: Option<&str>,
    role: RecipientRole,
    policy: ParsingPolicy,
) -> Result<(Option<FormattedAddress>, Option<AddressWarning>), AddressError> {
    let input = match input {
        Some(input) if !input.trim().is_empty() => input,
        _ => return Ok((None, None)),
    };

    match address::format(input) {
        Ok(formatted) => Ok((Some(formatted), None)),
        Err(error) if policy == ParsingPolicy::Strict => Err(error),
        Err(error) => {
            tracing::warn!(
                role = %role,
                input = %error.input,
                "Could not parse address: {}",
                error.kind
            );
            Ok((None, Some(AddressWarning { role, error })))
        }
    }
}
