//! RFC 5322 mailbox parsing and header formatting.
//!
//! [`format`] accepts either a bare `local@domain` addr-spec or a
//! `display-name <local@domain>` name-addr and produces a
//! [`FormattedAddress`] whose `Display` form is safe to place in a header:
//! `"Name" <local@domain>` when a display name is present, otherwise the bare
//! address.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::errors::{AddressError, AddressErrorKind};

const MAX_LOCAL_PART_LEN: usize = 64;
const MAX_ADDRESS_LEN: usize = 254;

/// A validated mailbox ready for a header or an SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormattedAddress {
    name: Option<String>,
    address: String,
}

impl FormattedAddress {
    /// Returns the addr-spec (`local@domain`).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the domain part of the address.
    pub fn domain(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or_default()
    }

    /// Formats the address for email headers.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) => format!("\"{}\" <{}>", escape_quoted(name), self.address),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for FormattedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl FromStr for FormattedAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        format(s)
    }
}

/// Parses and canonicalizes a single mailbox string.
///
/// The error carries the untouched input together with the parser's
/// diagnostic.
pub fn format(input: &str) -> Result<FormattedAddress, AddressError> {
    parse_mailbox(input).map_err(|kind| AddressError::new(input, kind))
}

fn parse_mailbox(input: &str) -> Result<FormattedAddress, AddressErrorKind> {
    let mut cursor = Cursor::new(input);
    cursor.skip_ws();
    if cursor.is_at_end() {
        return Err(AddressErrorKind::NoAddress);
    }

    if !has_unquoted_angle(input) {
        let address = cursor.addr_spec()?;
        cursor.skip_ws();
        cursor.expect_end()?;
        return Ok(FormattedAddress { name: None, address });
    }

    let name = cursor.phrase()?;
    cursor.expect('<')?;
    cursor.skip_ws();
    let address = cursor.addr_spec()?;
    cursor.skip_ws();
    if !cursor.eat('>') {
        return Err(match cursor.peek() {
            None => AddressErrorKind::UnclosedAngleAddr,
            Some(c) => AddressErrorKind::InvalidCharacter(c),
        });
    }
    cursor.skip_ws();
    cursor.expect_end()?;

    Ok(FormattedAddress { name, address })
}

/// Characters allowed in an RFC 5322 atom, plus UTF-8 (RFC 6532).
fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || "!#$%&'*+-/=?^_`{|}~".contains(c)
        || (!c.is_ascii() && !c.is_control())
}

fn is_dot_atom(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|atom| !atom.is_empty() && atom.chars().all(is_atext))
}

fn escape_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn has_unquoted_angle(input: &str) -> bool {
    let mut in_quote = false;
    let mut escaped = false;
    for c in input.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            '<' if !in_quote => return true,
            _ => {}
        }
    }
    false
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), AddressErrorKind> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(match self.peek() {
                None => AddressErrorKind::UnclosedAngleAddr,
                Some(found) => AddressErrorKind::InvalidCharacter(found),
            })
        }
    }

    fn expect_end(&self) -> Result<(), AddressErrorKind> {
        match self.peek() {
            None => Ok(()),
            Some(c) if c.is_control() => Err(AddressErrorKind::InvalidCharacter(c)),
            Some(_) => Err(AddressErrorKind::TrailingCharacters(self.rest().to_string())),
        }
    }

    /// Consumes a run of atext (and dots when `allow_dot`).
    fn atom(&mut self, allow_dot: bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_atext(c) || (allow_dot && c == '.') {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn dot_atom(&mut self) -> Option<&'a str> {
        let start = self.pos;
        let text = self.atom(true);
        if is_dot_atom(text) {
            Some(text)
        } else {
            self.pos = start;
            None
        }
    }

    /// Reads a quoted string; the opening quote must already be consumed.
    fn quoted_string(&mut self) -> Result<String, AddressErrorKind> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(AddressErrorKind::UnclosedQuotedString),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    None => return Err(AddressErrorKind::UnclosedQuotedString),
                    Some(c) if c.is_control() && c != '\t' => {
                        return Err(AddressErrorKind::InvalidCharacter(c))
                    }
                    Some(c) => out.push(c),
                },
                Some(c) if c.is_control() && c != '\t' => {
                    return Err(AddressErrorKind::InvalidCharacter(c))
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn local_part(&mut self) -> Result<String, AddressErrorKind> {
        if self.eat('"') {
            let content = self.quoted_string()?;
            if content.is_empty() {
                return Err(AddressErrorKind::InvalidLocalPart);
            }
            return Ok(if is_dot_atom(&content) {
                content
            } else {
                format!("\"{}\"", escape_quoted(&content))
            });
        }
        self.dot_atom()
            .map(str::to_string)
            .ok_or(AddressErrorKind::InvalidLocalPart)
    }

    fn domain(&mut self) -> Result<String, AddressErrorKind> {
        if self.peek() == Some('@') {
            return Err(AddressErrorKind::MultipleAt);
        }
        if self.eat('[') {
            let start = self.pos;
            loop {
                match self.bump() {
                    Some(']') => break,
                    Some(c) if c == '[' || c == '\\' || c.is_whitespace() || c.is_control() => {
                        return Err(AddressErrorKind::InvalidDomain)
                    }
                    Some(_) => {}
                    None => return Err(AddressErrorKind::InvalidDomain),
                }
            }
            let literal = &self.input[start..self.pos - 1];
            if literal.is_empty() {
                return Err(AddressErrorKind::InvalidDomain);
            }
            return Ok(format!("[{}]", literal));
        }
        self.dot_atom()
            .map(str::to_string)
            .ok_or(AddressErrorKind::InvalidDomain)
    }

    fn addr_spec(&mut self) -> Result<String, AddressErrorKind> {
        let local = self.local_part().map_err(|kind| {
            if kind == AddressErrorKind::InvalidLocalPart && !self.rest().contains('@') {
                AddressErrorKind::MissingAt
            } else {
                kind
            }
        })?;

        if !self.eat('@') {
            return Err(if self.rest().contains('@') {
                AddressErrorKind::InvalidLocalPart
            } else {
                AddressErrorKind::MissingAt
            });
        }

        let domain = self.domain()?;
        if self.peek() == Some('@') {
            return Err(AddressErrorKind::MultipleAt);
        }

        if local.len() > MAX_LOCAL_PART_LEN {
            return Err(AddressErrorKind::LocalPartTooLong);
        }
        let address = format!("{}@{}", local, domain);
        if address.len() > MAX_ADDRESS_LEN {
            return Err(AddressErrorKind::AddressTooLong);
        }
        Ok(address)
    }

    /// Reads a display-name phrase up to (not including) the `<`.
    ///
    /// Atoms that are RFC 2047 encoded words are decoded; whitespace between
    /// two adjacent encoded words is dropped.
    fn phrase(&mut self) -> Result<Option<String>, AddressErrorKind> {
        let mut name = String::new();
        let mut previous_encoded = false;
        loop {
            self.skip_ws();
            let (word, encoded) = match self.peek() {
                Some('<') => break,
                Some('"') => {
                    self.bump();
                    (self.quoted_string()?, false)
                }
                Some(c) if is_atext(c) || c == '.' => {
                    let atom = self.atom(true);
                    match decode_encoded_word(atom) {
                        Some(decoded) => (decoded, true),
                        None => (atom.to_string(), false),
                    }
                }
                Some(_) => return Err(AddressErrorKind::InvalidDisplayName),
                None => return Err(AddressErrorKind::UnclosedAngleAddr),
            };

            if word.is_empty() {
                continue;
            }
            if !name.is_empty() && !(encoded && previous_encoded) {
                name.push(' ');
            }
            name.push_str(&word);
            previous_encoded = encoded;
        }

        Ok(if name.is_empty() { None } else { Some(name) })
    }
}

/// Decodes an RFC 2047 `=?charset?encoding?text?=` word.
///
/// Returns `None` when `word` is not an encoded word, names an unsupported
/// charset, or decodes to control characters; the caller keeps it literal.
fn decode_encoded_word(word: &str) -> Option<String> {
    let inner = word.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.split('?');
    let (charset, encoding, text) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => BASE64.decode(text).ok()?,
        "Q" | "q" => decode_q(text)?,
        _ => return None,
    };

    // RFC 2231 allows a language suffix: `utf-8*en`.
    let charset = charset.split('*').next()?.to_ascii_lowercase();
    let decoded = match charset.as_str() {
        "utf-8" | "us-ascii" => String::from_utf8(bytes).ok()?,
        "iso-8859-1" | "latin1" => bytes.into_iter().map(char::from).collect(),
        _ => return None,
    };

    if decoded.chars().any(char::is_control) {
        return None;
    }
    Some(decoded)
}

fn decode_q(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '_' => out.push(b' '),
            '=' => {
                let hi = chars.next()?.to_digit(16)?;
                let lo = chars.next()?.to_digit(16)?;
                out.push((hi * 16 + lo) as u8);
            }
            c if c.is_ascii() => out.push(c as u8),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("\"Name\" <a@b>", "\"Name\" <a@b>")]
    #[case("a@b", "a@b")]
    #[case("Name <a@b>", "\"Name\" <a@b>")]
    #[case("  a@b.com  ", "a@b.com")]
    #[case("<a@b.com>", "a@b.com")]
    #[case("\"\" <a@b.com>", "a@b.com")]
    #[case("\"Doe, John\" <john@example.com>", "\"Doe, John\" <john@example.com>")]
    #[case("J. Random Hacker <jrh@example.org>", "\"J. Random Hacker\" <jrh@example.org>")]
    #[case("\"say \\\"hi\\\"\" <a@b>", "\"say \\\"hi\\\"\" <a@b>")]
    #[case("first.last+tag@sub.example.com", "first.last+tag@sub.example.com")]
    #[case("user@[192.168.0.1]", "user@[192.168.0.1]")]
    #[case("\"john doe\"@example.com", "\"john doe\"@example.com")]
    #[case("\"plain\"@example.com", "plain@example.com")]
    #[case("Zoë <zoe@example.com>", "\"Zoë\" <zoe@example.com>")]
    #[case("John  Smith < john@example.com >", "\"John Smith\" <john@example.com>")]
    #[case("=?utf-8?q?J=C3=BCrgen?= <j@x.com>", "\"Jürgen\" <j@x.com>")]
    #[case("=?UTF-8?B?SsO8cmdlbg==?= <j@x.com>", "\"Jürgen\" <j@x.com>")]
    #[case("=?ISO-8859-1?Q?Andr=E9?= Pirard <a@b.org>", "\"André Pirard\" <a@b.org>")]
    #[case("=?utf-8?q?Hello_?= =?utf-8?q?World?= <a@b>", "\"Hello World\" <a@b>")]
    #[case("=?koi8-r?q?x?= <a@b>", "\"=?koi8-r?q?x?=\" <a@b>")]
    #[case("=?utf-8?q?a=0D=0Ab?= <a@b>", "\"=?utf-8?q?a=0D=0Ab?=\" <a@b>")]
    fn test_formats_valid_addresses(#[case] input: &str, #[case] expected: &str) {
        let formatted = format(input).unwrap();
        assert_eq!(formatted.to_string(), expected);
    }

    #[rstest]
    #[case("", AddressErrorKind::NoAddress)]
    #[case("   ", AddressErrorKind::NoAddress)]
    #[case("bad", AddressErrorKind::MissingAt)]
    #[case("not-an-email", AddressErrorKind::MissingAt)]
    #[case("a@@b.com", AddressErrorKind::MultipleAt)]
    #[case("a@b@c.com", AddressErrorKind::MultipleAt)]
    #[case("@b.com", AddressErrorKind::InvalidLocalPart)]
    #[case("a..b@c.com", AddressErrorKind::InvalidLocalPart)]
    #[case(".a@c.com", AddressErrorKind::InvalidLocalPart)]
    #[case("a@", AddressErrorKind::InvalidDomain)]
    #[case("a@b..com", AddressErrorKind::InvalidDomain)]
    #[case("Name <a@b.com", AddressErrorKind::UnclosedAngleAddr)]
    #[case("\"Name <a@b.com>", AddressErrorKind::UnclosedQuotedString)]
    #[case("Name <bad>", AddressErrorKind::MissingAt)]
    #[case("Bad; Name <a@b.com>", AddressErrorKind::InvalidDisplayName)]
    fn test_rejects_malformed_addresses(#[case] input: &str, #[case] expected: AddressErrorKind) {
        let err = format(input).unwrap_err();
        assert_eq!(err.input, input);
        assert_eq!(err.kind, expected);
    }

    #[test]
    fn test_rejects_header_injection() {
        let err = format("a@b.com\r\nBcc: evil@example.com").unwrap_err();
        assert_eq!(err.kind, AddressErrorKind::InvalidCharacter('\r'));
    }

    #[test]
    fn test_rejects_second_address() {
        let err = format("a@b.com c@d.com").unwrap_err();
        assert_eq!(
            err.kind,
            AddressErrorKind::TrailingCharacters("c@d.com".to_string())
        );
    }

    #[test]
    fn test_length_limits() {
        let local = "a".repeat(65);
        let err = format(&format!("{}@example.com", local)).unwrap_err();
        assert_eq!(err.kind, AddressErrorKind::LocalPartTooLong);

        let domain = format!("{}.com", "d".repeat(260));
        let err = format(&format!("a@{}", domain)).unwrap_err();
        assert_eq!(err.kind, AddressErrorKind::AddressTooLong);
    }

    #[test]
    fn test_accessors() {
        let addr: FormattedAddress = "\"Jane\" <jane@mail.example.com>".parse().unwrap();
        assert_eq!(addr.name(), Some("Jane"));
        assert_eq!(addr.address(), "jane@mail.example.com");
        assert_eq!(addr.domain(), "mail.example.com");
    }
}
