//! Configuration for a single invocation.
//!
//! Values come from three layers, highest precedence first:
//! - command-line flags and their `EMAIL_*` environment variables ([`Overrides`])
//! - a YAML or JSON config file ([`FileConfig`])
//! - built-in defaults
//!
//! The merged [`Config`] is built once and read-only afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::auth::Credentials;
use crate::compose::MessageFields;
use crate::errors::{ConfigError, SmtpError, SmtpResult};
use crate::recipients::ParsingPolicy;

/// Default SMTP relay host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default SMTP port (relay).
pub const DEFAULT_PORT: u16 = 25;

/// Port on which implicit TLS is assumed.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Default timeout for connections and TLS handshakes.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default EHLO client identity.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

const CONFIG_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TlsMode {
    /// Never use TLS.
    #[serde(rename = "none")]
    None,
    /// Upgrade with STARTTLS when the server offers it.
    #[default]
    #[serde(rename = "starttls")]
    StartTls,
    /// Fail unless the server offers STARTTLS.
    #[serde(rename = "starttls-required")]
    StartTlsRequired,
    /// TLS from the first byte (port 465).
    #[serde(rename = "implicit")]
    Implicit,
}

impl TlsMode {
    /// Returns the mode implied by the port when none is configured.
    pub fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        }
    }

    /// Returns the configuration value for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::None => "none",
            TlsMode::StartTls => "starttls",
            TlsMode::StartTlsRequired => "starttls-required",
            TlsMode::Implicit => "implicit",
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TlsMode::None),
            "starttls" => Ok(TlsMode::StartTls),
            "starttls-required" => Ok(TlsMode::StartTlsRequired),
            "implicit" | "tls" => Ok(TlsMode::Implicit),
            other => Err(format!(
                "unknown TLS mode '{}' (expected none, starttls, starttls-required or implicit)",
                other
            )),
        }
    }
}

/// SMTP relay configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// TLS mode.
    pub tls: TlsMode,
    /// Authentication username.
    pub username: Option<String>,
    /// Authentication password.
    pub password: Option<SecretString>,
    /// Connect and TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Command timeout.
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    pub client_id: Option<String>,
}

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.host.trim().is_empty() {
            return Err(SmtpError::configuration("SMTP server is required"));
        }

        if self.port == 0 {
            return Err(SmtpError::configuration("SMTP port must be between 1 and 65535"));
        }

        Ok(())
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns true if authentication is configured.
    ///
    /// Either a username or a password is enough; the other side is sent
    /// empty.
    pub fn has_auth(&self) -> bool {
        let has_username = self.username.as_deref().is_some_and(|u| !u.is_empty());
        let has_password = self
            .password
            .as_ref()
            .is_some_and(|p| !p.expose_secret().is_empty());
        has_username || has_password
    }

    /// Returns the credentials if authentication is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if !self.has_auth() {
            return None;
        }
        Some(Credentials {
            username: self.username.clone().unwrap_or_default(),
            password: self
                .password
                .clone()
                .unwrap_or_else(|| SecretString::new(String::new())),
        })
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID)
    }
}

/// Builder for SMTP configuration.
#[derive(Debug, Default)]
pub struct SmtpConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    tls: Option<TlsMode>,
    username: Option<String>,
    password: Option<SecretString>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    client_id: Option<String>,
}

impl SmtpConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the TLS mode; derived from the port when unset.
    pub fn tls(mut self, mode: TlsMode) -> Self {
        self.tls = Some(mode);
        self
    }

    /// Sets plain credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password.
    pub fn password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<SmtpConfig> {
        let port = self.port.unwrap_or(DEFAULT_PORT);
        let config = SmtpConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            tls: self.tls.unwrap_or_else(|| TlsMode::for_port(port)),
            username: self.username,
            password: self.password,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            command_timeout: self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            client_id: self.client_id,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Values set on the command line or through `EMAIL_*` variables.
///
/// `None` means "not set here"; the file and defaults fill the gap.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Explicit config file path.
    pub config_path: Option<PathBuf>,
    /// Strict parsing.
    pub strict_parsing: Option<bool>,
    /// To recipients.
    pub to: Option<Vec<String>>,
    /// From address.
    pub from: Option<String>,
    /// Reply-To address.
    pub reply_to: Option<String>,
    /// CC recipients.
    pub cc: Option<Vec<String>>,
    /// BCC recipients.
    pub bcc: Option<Vec<String>>,
    /// Subject.
    pub subject: Option<String>,
    /// Plain text body.
    pub message: Option<String>,
    /// HTML body.
    pub html_message: Option<String>,
    /// Attachment paths.
    pub attachments: Option<Vec<String>>,
    /// Relay host.
    pub smtp_server: Option<String>,
    /// Relay port.
    pub smtp_port: Option<u16>,
    /// Relay username.
    pub smtp_username: Option<String>,
    /// Relay password.
    pub smtp_password: Option<SecretString>,
    /// TLS mode.
    pub smtp_tls: Option<TlsMode>,
}

/// A list value that may be written as a single string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    /// A single value.
    One(String),
    /// A sequence of values.
    Many(Vec<String>),
}

impl From<StringList> for Vec<String> {
    fn from(list: StringList) -> Self {
        match list {
            StringList::One(value) => vec![value],
            StringList::Many(values) => values,
        }
    }
}

/// Layout of a config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    /// Strict parsing.
    pub strict_parsing: Option<bool>,
    /// Message settings.
    pub email: FileEmailSettings,
    /// Relay settings.
    pub smtp: FileSmtpSettings,
}

/// `email:` section of a config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileEmailSettings {
    /// To recipients.
    pub to: Option<StringList>,
    /// From address.
    pub from: Option<String>,
    /// Reply-To address.
    pub reply_to: Option<String>,
    /// CC recipients.
    pub cc: Option<StringList>,
    /// BCC recipients.
    pub bcc: Option<StringList>,
    /// Subject.
    pub subject: Option<String>,
    /// Plain text body.
    pub message: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Attachment paths.
    pub attachments: Option<StringList>,
}

/// `smtp:` section of a config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileSmtpSettings {
    /// Relay host.
    pub server: Option<String>,
    /// Relay port.
    pub port: Option<u16>,
    /// Relay username.
    pub username: Option<String>,
    /// Relay password.
    pub password: Option<SecretString>,
    /// TLS mode.
    pub tls: Option<TlsMode>,
}

impl FileConfig {
    /// Loads a config file, choosing the format from its extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(&contents).map_err(|e| e.to_string())
        } else if contents.trim().is_empty() {
            Ok(FileConfig::default())
        } else {
            serde_yaml::from_str(&contents).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Returns the paths searched when no config file is given.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = CONFIG_EXTENSIONS
            .iter()
            .map(|ext| PathBuf::from(format!("config.{}", ext)))
            .collect();

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("email.yml"));
        }

        paths.extend(
            CONFIG_EXTENSIONS
                .iter()
                .map(|ext| PathBuf::from("/etc/email").join(format!("config.{}", ext))),
        );

        paths
    }

    /// Loads the explicit file, or the first file found on the search path.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path).map(|config| Some((path.to_path_buf(), config)));
        }

        for path in Self::search_paths() {
            if path.is_file() {
                return Self::load(&path).map(|config| Some((path, config)));
            }
            tracing::debug!(path = %path.display(), "No config file");
        }

        Ok(None)
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Abort on any malformed address instead of skipping it.
    pub strict_parsing: bool,
    /// Message fields.
    pub email: MessageFields,
    /// Relay settings.
    pub smtp: SmtpConfig,
}

impl Config {
    /// Loads the config file (if any) and merges it under `overrides`.
    pub fn resolve(overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match FileConfig::discover(overrides.config_path.as_deref())? {
            Some((path, file)) => {
                tracing::info!(path = %path.display(), "Using config file");
                file
            }
            None => FileConfig::default(),
        };

        Self::merge(overrides, file)
    }

    /// Merges flag values over file values over defaults.
    pub fn merge(overrides: Overrides, file: FileConfig) -> Result<Self, ConfigError> {
        let FileConfig {
            strict_parsing,
            email,
            smtp,
        } = file;

        let list = |cli: Option<Vec<String>>, file: Option<StringList>| -> Vec<String> {
            cli.or_else(|| file.map(Into::into)).unwrap_or_default()
        };

        let fields = MessageFields {
            from: overrides.from.or(email.from).unwrap_or_default(),
            reply_to: overrides.reply_to.or(email.reply_to).unwrap_or_default(),
            to: list(overrides.to, email.to),
            cc: list(overrides.cc, email.cc),
            bcc: list(overrides.bcc, email.bcc),
            subject: overrides.subject.or(email.subject).unwrap_or_default(),
            message: overrides.message.or(email.message).unwrap_or_default(),
            html_message: overrides.html_message.or(email.html).unwrap_or_default(),
            attachments: list(overrides.attachments, email.attachments),
        };

        let mut builder = SmtpConfig::builder()
            .host(overrides.smtp_server.or(smtp.server).unwrap_or_else(|| DEFAULT_HOST.to_string()))
            .port(overrides.smtp_port.or(smtp.port).unwrap_or(DEFAULT_PORT));
        if let Some(tls) = overrides.smtp_tls.or(smtp.tls) {
            builder = builder.tls(tls);
        }
        if let Some(username) = overrides.smtp_username.or(smtp.username) {
            builder = builder.username(username);
        }
        if let Some(password) = overrides.smtp_password.or(smtp.password) {
            builder = builder.password(password);
        }

        let smtp = builder
            .build()
            .map_err(|e| ConfigError::Invalid(e.message().to_string()))?;

        Ok(Self {
            strict_parsing: overrides.strict_parsing.or(strict_parsing).unwrap_or(false),
            email: fields,
            smtp,
        })
    }

    /// Returns the address parsing policy.
    pub fn policy(&self) -> ParsingPolicy {
        ParsingPolicy::from_strict(self.strict_parsing)
    }
}
