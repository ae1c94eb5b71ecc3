//! Authentication mechanisms for SMTP.
//!
//! Supports the password-based methods relays commonly offer:
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)
//! - CRAM-MD5 (RFC 2195)
//!
//! PLAIN and LOGIN send the password in the clear, so they are only offered
//! over TLS or to a loopback relay.

use std::fmt;
use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Authentication methods supported by the dialer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
    /// CRAM-MD5 challenge-response.
    CramMd5,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
        }
    }

    /// Returns the priority for auto-selection (higher is better).
    pub fn priority(&self) -> u8 {
        match self {
            AuthMethod::CramMd5 => 3,
            AuthMethod::Plain => 2,
            AuthMethod::Login => 1,
        }
    }

    /// Parses from an SMTP capability keyword.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            _ => None,
        }
    }

    /// Returns true if this method exposes the password on the wire.
    pub fn requires_tls(&self) -> bool {
        matches!(self, AuthMethod::Plain | AuthMethod::Login)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password for AUTH.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Authentication mechanism implementation.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(username: &str, password: &SecretString) -> String {
        // \0username\0password
        let response = format!("\0{}\0{}", username, password.expose_secret());
        BASE64.encode(response)
    }

    /// Generates LOGIN username response.
    pub fn login_username(username: &str) -> String {
        BASE64.encode(username)
    }

    /// Generates LOGIN password response.
    pub fn login_password(password: &SecretString) -> String {
        BASE64.encode(password.expose_secret())
    }

    /// Generates CRAM-MD5 response.
    pub fn cram_md5_response(
        challenge: &str,
        username: &str,
        password: &SecretString,
    ) -> SmtpResult<String> {
        let challenge_bytes = BASE64
            .decode(challenge.trim())
            .map_err(|e| SmtpError::authentication(format!("Invalid CRAM-MD5 challenge: {}", e)))?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(password.expose_secret().as_bytes())
            .map_err(|e| SmtpError::authentication(format!("HMAC error: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        // username SP hex-digest
        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(BASE64.encode(format!("{} {}", username, hex_digest)))
    }

    /// Selects the best method from those the server advertised.
    ///
    /// `secure` is true when the session is encrypted or the relay is on
    /// the loopback interface; otherwise clear-text methods are excluded.
    pub fn select_best_method(available: &[AuthMethod], secure: bool) -> SmtpResult<AuthMethod> {
        let best = available
            .iter()
            .filter(|m| secure || !m.requires_tls())
            .copied()
            .max_by_key(|m| m.priority());

        best.ok_or_else(|| {
            let message = if available.is_empty() {
                "No supported authentication method advertised".to_string()
            } else {
                "Refusing to send credentials over an unencrypted connection".to_string()
            };
            SmtpError::new(SmtpErrorKind::AuthMethodNotSupported, message)
        })
    }
}

/// Returns true if `host` names the local machine.
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_from_capability() {
        assert_eq!(AuthMethod::from_capability("PLAIN"), Some(AuthMethod::Plain));
        assert_eq!(AuthMethod::from_capability("login"), Some(AuthMethod::Login));
        assert_eq!(AuthMethod::from_capability("CRAM-MD5"), Some(AuthMethod::CramMd5));
        assert_eq!(AuthMethod::from_capability("XOAUTH2"), None);
    }

    #[test]
    fn test_plain_initial_response() {
        let password = SecretString::new("password".to_string());
        let response = Authenticator::plain_initial_response("user", &password);
        let decoded = BASE64.decode(&response).unwrap();
        assert_eq!(decoded, b"\0user\0password");
    }

    #[test]
    fn test_login_responses() {
        let password = SecretString::new("secret".to_string());
        assert_eq!(Authenticator::login_username("user"), "dXNlcg==");
        assert_eq!(Authenticator::login_password(&password), "c2VjcmV0");
    }

    #[test]
    fn test_cram_md5_response() {
        // RFC 2195 section 2 example.
        let challenge = BASE64.encode("<1896.697170952@postoffice.reston.mci.net>");
        let password = SecretString::new("tanstaaftanstaaf".to_string());
        let response = Authenticator::cram_md5_response(&challenge, "tim", &password).unwrap();
        let decoded = String::from_utf8(BASE64.decode(response).unwrap()).unwrap();
        assert_eq!(decoded, "tim b913a602c7eda7a495b4e6e7334d3890");

        assert!(Authenticator::cram_md5_response("!!!", "tim", &password).is_err());
    }

    #[test]
    fn test_select_best_method() {
        let available = vec![AuthMethod::Plain, AuthMethod::Login, AuthMethod::CramMd5];

        let method = Authenticator::select_best_method(&available, true).unwrap();
        assert_eq!(method, AuthMethod::CramMd5);

        let method = Authenticator::select_best_method(&available, false).unwrap();
        assert_eq!(method, AuthMethod::CramMd5);

        let offered = [AuthMethod::Login, AuthMethod::Plain];
        let method = Authenticator::select_best_method(&offered, true).unwrap();
        assert_eq!(method, AuthMethod::Plain);
    }

    #[test]
    fn test_select_refuses_clear_text_without_tls() {
        let err = Authenticator::select_best_method(&[AuthMethod::Plain], false).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);
        assert!(err.message().contains("unencrypted"));

        let err = Authenticator::select_best_method(&[], true).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);
    }

    #[test]
    fn test_loopback_hosts() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("[::1]"));
        assert!(!is_loopback_host("smtp.example.com"));
        assert!(!is_loopback_host("10.0.0.1"));
    }

    #[test]
    fn test_credentials_debug() {
        let creds = Credentials::new("user", "secret_password");
        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret_password"));
    }
}
