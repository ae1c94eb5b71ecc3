//! Command-line interface.
//!
//! Every message and relay flag can also be set through an `EMAIL_*`
//! environment variable; the flag wins when both are present. Flags tagged
//! "multi" may be repeated or given a comma-separated list.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::Parser;
use secrecy::SecretString;

use crate::config::{Overrides, TlsMode};

/// Send an email from the command line.
#[derive(Parser, Debug)]
#[command(
    name = "email",
    about = "Send an email from the command line",
    long_about = "Send an email from the command line.\n\n\
                  If a flag is tagged with 'multi', multiple versions of the flag are accepted.\n\
                  Piped standard input replaces the message body.",
    disable_version_flag = true
)]
pub struct Cli {
    /// Config file (default is ./config.yml, $HOME/.config/email.yml or /etc/email/config.yml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write debug messages to the console
    #[arg(short = 'D', long, hide = true)]
    pub debug: bool,

    /// Show the version and exit
    #[arg(short = 'v', long)]
    pub version: bool,

    /// Fail to send the email when any email address is malformed
    #[arg(
        short = 'e',
        long,
        env = "EMAIL_STRICT_PARSING",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub strict_parsing: Option<bool>,

    /// Destination addresses (multi)
    #[arg(short = 't', long, env = "EMAIL_TO", value_delimiter = ',', value_name = "ADDRESS")]
    pub to: Option<Vec<String>>,

    /// From address on email (default $USER@$HOST)
    #[arg(short = 'f', long, env = "EMAIL_FROM", value_name = "ADDRESS")]
    pub from: Option<String>,

    /// Reply-To address on email
    #[arg(short = 'r', long, env = "EMAIL_REPLY_TO", value_name = "ADDRESS")]
    pub reply_to: Option<String>,

    /// Carbon copy addresses (multi)
    #[arg(short = 'c', long, env = "EMAIL_CC", value_delimiter = ',', value_name = "ADDRESS")]
    pub cc: Option<Vec<String>>,

    /// Blind carbon copy addresses (multi)
    #[arg(short = 'b', long, env = "EMAIL_BCC", value_delimiter = ',', value_name = "ADDRESS")]
    pub bcc: Option<Vec<String>>,

    /// Email subject
    #[arg(short = 's', long, env = "EMAIL_SUBJECT")]
    pub subject: Option<String>,

    /// Email message body
    #[arg(short = 'm', long, env = "EMAIL_MESSAGE")]
    pub message: Option<String>,

    /// HTML version of the message body
    #[arg(short = 'H', long, env = "EMAIL_HTML_MESSAGE")]
    pub html_message: Option<String>,

    /// Files to attach (multi)
    #[arg(short = 'a', long, env = "EMAIL_ATTACHMENT", value_delimiter = ',', value_name = "PATH")]
    pub attachment: Option<Vec<String>>,

    /// SMTP server host
    #[arg(short = 'x', long, env = "EMAIL_SMTP_SERVER", value_name = "HOST")]
    pub smtp_server: Option<String>,

    /// SMTP server port
    #[arg(short = 'o', long, env = "EMAIL_SMTP_PORT", value_name = "PORT")]
    pub smtp_port: Option<u16>,

    /// SMTP server username
    #[arg(short = 'u', long, env = "EMAIL_SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    /// SMTP server password
    #[arg(short = 'p', long, env = "EMAIL_SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    /// Transport security: none, starttls, starttls-required or implicit
    #[arg(long, env = "EMAIL_SMTP_TLS", value_name = "MODE", value_parser = parse_tls_mode)]
    pub smtp_tls: Option<TlsMode>,
}

impl Cli {
    /// Converts the parsed flags into configuration overrides.
    pub fn into_overrides(self) -> Overrides {
        Overrides {
            config_path: self.config,
            strict_parsing: self.strict_parsing,
            to: self.to,
            from: self.from,
            reply_to: self.reply_to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            message: self.message,
            html_message: self.html_message,
            attachments: self.attachment,
            smtp_server: self.smtp_server,
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username,
            smtp_password: self.smtp_password.map(SecretString::new),
            smtp_tls: self.smtp_tls,
        }
    }
}

/// Returns the line printed by `--version`.
pub fn version_line() -> String {
    format!("email {}", env!("CARGO_PKG_VERSION"))
}

fn parse_tls_mode(value: &str) -> Result<TlsMode, String> {
    value.parse()
}
