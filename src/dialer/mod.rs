//! Dial-and-send over a single SMTP session.
//!
//! The [`Dialer`] decides between an anonymous and an authenticated session
//! from the configured credentials, then runs one transaction:
//! EHLO (or HELO), optional STARTTLS, optional AUTH, MAIL FROM, one RCPT TO
//! per envelope recipient, DATA, QUIT.

use std::time::Instant;

use crate::auth::{is_loopback_host, AuthMethod, Authenticator, Credentials};
use crate::config::{SmtpConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::MimeEncoder;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::{SmtpTransport, TcpTransport};
use crate::types::{EncodedMessage, SendResult};

/// Whether the session authenticates.
#[derive(Debug, Clone)]
pub enum DialMode {
    /// No AUTH is attempted.
    Anonymous,
    /// AUTH with the given credentials when the server supports it.
    Authenticated(Credentials),
}

impl DialMode {
    /// Returns true for [`DialMode::Authenticated`].
    pub fn is_authenticated(&self) -> bool {
        matches!(self, DialMode::Authenticated(_))
    }
}

/// Sends encoded messages to the configured relay.
#[derive(Debug, Clone)]
pub struct Dialer {
    config: SmtpConfig,
    mode: DialMode,
}

impl Dialer {
    /// Creates a dialer; credentials are used iff a username or password is set.
    pub fn from_config(config: &SmtpConfig) -> Self {
        let mode = match config.credentials() {
            Some(credentials) => DialMode::Authenticated(credentials),
            None => DialMode::Anonymous,
        };

        Self {
            config: config.clone(),
            mode,
        }
    }

    /// Returns the session mode.
    pub fn mode(&self) -> &DialMode {
        &self.mode
    }

    /// Connects to the relay and delivers `message`.
    pub async fn send(&self, message: &EncodedMessage) -> SmtpResult<SendResult> {
        let start = Instant::now();
        tracing::debug!(
            address = %self.config.address(),
            tls = %self.config.tls,
            authenticated = self.mode.is_authenticated(),
            "Dialing relay"
        );

        let mut transport = TcpTransport::connect(&self.config).await?;
        let result = self.deliver(&mut transport, message).await;

        if result.is_err() {
            transport.close().await.ok();
        }

        result.map(|mut sent| {
            sent.duration = start.elapsed();
            sent
        })
    }

    /// Runs the SMTP transaction on an already greeted transport.
    pub async fn deliver<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        message: &EncodedMessage,
    ) -> SmtpResult<SendResult> {
        self.hello(transport).await?;
        self.negotiate_tls(transport).await?;

        if let DialMode::Authenticated(credentials) = &self.mode {
            self.authenticate(transport, credentials).await?;
        }

        let data = MimeEncoder::prepare_data_content(&message.data);
        let size_limit = transport.capabilities().and_then(EsmtpCapabilities::size_limit);
        if let Some(limit) = size_limit {
            if message.data.len() > limit {
                return Err(SmtpError::message_error(
                    SmtpErrorKind::MessageTooLarge,
                    format!(
                        "Message is {} bytes, server accepts at most {}",
                        message.data.len(),
                        limit
                    ),
                ));
            }
        }

        let mail_from = SmtpCommand::MailFrom {
            address: format!("<{}>", message.envelope.from),
            size: size_limit.map(|_| message.data.len()),
        };
        let response = transport.send_command(&mail_from).await?;
        if !response.is_success() {
            return Err(response.to_error());
        }

        let mut accepted = Vec::with_capacity(message.envelope.recipients.len());
        for recipient in &message.envelope.recipients {
            let rcpt_to = SmtpCommand::RcptTo {
                address: format!("<{}>", recipient),
            };

            let response = transport.send_command(&rcpt_to).await?;
            if !matches!(response.code, codes::OK | codes::WILL_FORWARD) {
                transport.send_command(&SmtpCommand::Rset).await.ok();
                return Err(rejected_recipient(recipient, &response));
            }
            accepted.push(recipient.clone());
        }

        let response = transport.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(response.to_error());
        }

        transport.send_data(&data).await?;

        let response = transport.read_response().await?;
        if !response.is_success() {
            return Err(response.to_error());
        }
        tracing::debug!(message_id = %message.message_id, reply = %response, "Message accepted");

        transport.close().await?;

        Ok(SendResult {
            message_id: message.message_id.clone(),
            accepted,
            response: response.full_message(),
            duration: std::time::Duration::ZERO,
        })
    }

    /// Sends EHLO, falling back to HELO, and records the capabilities.
    async fn hello<T: SmtpTransport + ?Sized>(&self, transport: &mut T) -> SmtpResult<()> {
        let client_id = self.config.client_id().to_string();

        let response = transport
            .send_command(&SmtpCommand::Ehlo(client_id.clone()))
            .await?;
        if response.is_success() {
            transport.set_capabilities(EsmtpCapabilities::from_ehlo_response(&response));
            return Ok(());
        }

        tracing::debug!(reply = %response, "EHLO refused, falling back to HELO");
        let response = transport.send_command(&SmtpCommand::Helo(client_id)).await?;
        if !response.is_success() {
            return Err(response.to_error());
        }
        transport.set_capabilities(EsmtpCapabilities::default());
        Ok(())
    }

    /// Upgrades with STARTTLS according to the configured mode.
    async fn negotiate_tls<T: SmtpTransport + ?Sized>(&self, transport: &mut T) -> SmtpResult<()> {
        if transport.is_tls() {
            return Ok(());
        }

        let required = match self.config.tls {
            TlsMode::None | TlsMode::Implicit => return Ok(()),
            TlsMode::StartTls => false,
            TlsMode::StartTlsRequired => true,
        };

        let offered = transport.capabilities().is_some_and(|c| c.starttls);
        if !offered {
            if required {
                return Err(SmtpError::new(
                    SmtpErrorKind::StarttlsNotSupported,
                    "Server does not support STARTTLS",
                ));
            }
            tracing::debug!("STARTTLS not offered, continuing in plain text");
            return Ok(());
        }

        let response = transport.send_command(&SmtpCommand::StartTls).await?;
        if response.code != codes::SERVICE_READY {
            if required {
                return Err(SmtpError::new(
                    SmtpErrorKind::StarttlsNotSupported,
                    format!("STARTTLS refused: {}", response),
                ));
            }
            tracing::warn!(reply = %response, "STARTTLS refused, continuing in plain text");
            return Ok(());
        }

        transport.upgrade_tls(&self.config.host).await?;
        self.hello(transport).await
    }

    /// Authenticates if the server advertises AUTH.
    async fn authenticate<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        credentials: &Credentials,
    ) -> SmtpResult<()> {
        let available: Vec<AuthMethod> = match transport.capabilities() {
            Some(caps) if caps.has_auth() => caps.auth_mechanisms.iter().copied().collect(),
            _ => {
                tracing::warn!(
                    host = %self.config.host,
                    "Server does not advertise AUTH, sending without authentication"
                );
                return Ok(());
            }
        };

        let secure = transport.is_tls() || is_loopback_host(&self.config.host);
        let method = Authenticator::select_best_method(&available, secure)?;
        tracing::debug!(method = %method, username = %credentials.username, "Authenticating");

        match method {
            AuthMethod::Plain => self.auth_plain(transport, credentials).await,
            AuthMethod::Login => self.auth_login(transport, credentials).await,
            AuthMethod::CramMd5 => self.auth_cram_md5(transport, credentials).await,
        }
    }

    async fn auth_plain<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        credentials: &Credentials,
    ) -> SmtpResult<()> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::Plain.mechanism_name().to_string(),
            initial_response: Some(Authenticator::plain_initial_response(
                &credentials.username,
                &credentials.password,
            )),
        };

        let response = transport.send_command(&command).await?;
        expect_auth_success(&response)
    }

    async fn auth_login<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        credentials: &Credentials,
    ) -> SmtpResult<()> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::Login.mechanism_name().to_string(),
            initial_response: None,
        };

        let response = transport.send_command(&command).await?;
        if response.code != codes::AUTH_CONTINUE {
            return Err(response.to_error());
        }

        let username = Authenticator::login_username(&credentials.username);
        transport.send_data(format!("{}\r\n", username).as_bytes()).await?;
        let response = transport.read_response().await?;
        if response.code != codes::AUTH_CONTINUE {
            return Err(response.to_error());
        }

        let password = Authenticator::login_password(&credentials.password);
        transport.send_data(format!("{}\r\n", password).as_bytes()).await?;
        let response = transport.read_response().await?;
        expect_auth_success(&response)
    }

    async fn auth_cram_md5<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        credentials: &Credentials,
    ) -> SmtpResult<()> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::CramMd5.mechanism_name().to_string(),
            initial_response: None,
        };

        let response = transport.send_command(&command).await?;
        if response.code != codes::AUTH_CONTINUE {
            return Err(response.to_error());
        }

        let answer = Authenticator::cram_md5_response(
            response.first_message(),
            &credentials.username,
            &credentials.password,
        )?;
        transport.send_data(format!("{}\r\n", answer).as_bytes()).await?;

        let response = transport.read_response().await?;
        expect_auth_success(&response)
    }
}

fn expect_auth_success(response: &SmtpResponse) -> SmtpResult<()> {
    if response.code == codes::AUTH_SUCCESS {
        Ok(())
    } else {
        Err(response.to_error())
    }
}

fn rejected_recipient(recipient: &str, response: &SmtpResponse) -> SmtpError {
    let mut err = SmtpError::from_smtp_response(
        response.code,
        format!("Recipient <{}> rejected: {}", recipient, response.full_message()),
    );
    if let Some(enhanced) = &response.enhanced_code {
        err = err.with_enhanced_code(enhanced.clone());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmtpConfigBuilder;
    use crate::mocks::{self, MockTransport};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use secrecy::ExposeSecret;

    fn dialer(configure: impl FnOnce(SmtpConfigBuilder) -> SmtpConfigBuilder) -> Dialer {
        let config = configure(SmtpConfig::builder().host("smtp.example.com"))
            .build()
            .unwrap();
        Dialer::from_config(&config)
    }

    fn queue_transaction_tail(transport: &mut MockTransport) {
        transport
            .queue_ok() // MAIL FROM
            .queue_ok() // RCPT TO
            .queue_ok() // RCPT TO
            .queue_response(mocks::data_ready_response())
            .queue_response(SmtpResponse::new(250, "2.0.0 queued as ABC"));
    }

    #[test]
    fn test_dial_mode_from_config() {
        assert!(!dialer(|b| b).mode().is_authenticated());
        assert!(dialer(|b| b.username("user")).mode().is_authenticated());
        assert!(dialer(|b| b.password(secrecy::SecretString::new("pw".to_string())))
            .mode()
            .is_authenticated());
        assert!(!dialer(|b| b.credentials("", "")).mode().is_authenticated());

        match dialer(|b| b.credentials("user", "pw")).mode() {
            DialMode::Authenticated(creds) => {
                assert_eq!(creds.username, "user");
                assert_eq!(creds.password.expose_secret(), "pw");
            }
            DialMode::Anonymous => panic!("expected credentials"),
        }
    }

    #[tokio::test]
    async fn test_anonymous_plain_text_transaction() {
        let dialer = dialer(|b| b.tls(TlsMode::None));
        let mut transport = MockTransport::new();
        transport.queue_response(mocks::ehlo_response());
        queue_transaction_tail(&mut transport);

        let message = mocks::encoded_message();
        let result = dialer.deliver(&mut transport, &message).await.unwrap();

        assert_eq!(result.message_id, "test-id@example.com");
        assert_eq!(result.accepted, vec!["to@example.com", "hidden@example.com"]);
        assert_eq!(result.response, "2.0.0 queued as ABC");
        assert_eq!(
            transport.command_lines(),
            vec![
                "EHLO localhost".to_string(),
                format!("MAIL FROM:<sender@example.com> SIZE={}", message.data.len()),
                "RCPT TO:<to@example.com>".to_string(),
                "RCPT TO:<hidden@example.com>".to_string(),
                "DATA".to_string(),
                "QUIT".to_string(),
            ]
        );

        let data = &transport.received_data()[0];
        assert!(data.ends_with(b"\r\n..hello\r\n.\r\n"));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_opportunistic_starttls_then_auth() {
        let dialer = dialer(|b| b.port(587).credentials("user", "pw"));
        let mut transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_with(&["STARTTLS"]))
            .queue_response(mocks::starttls_ready_response())
            .queue_response(mocks::ehlo_with(&["AUTH PLAIN LOGIN"]))
            .queue_response(mocks::auth_success_response());
        queue_transaction_tail(&mut transport);

        dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap();

        assert!(transport.is_tls());
        assert_eq!(transport.tls_host(), Some("smtp.example.com"));

        let commands = transport.command_lines();
        assert_eq!(&commands[..3], &["EHLO localhost", "STARTTLS", "EHLO localhost"]);
        assert!(commands[3].starts_with("AUTH PLAIN "));
        let encoded = commands[3].trim_start_matches("AUTH PLAIN ");
        assert_eq!(BASE64.decode(encoded).unwrap(), b"\0user\0pw");
        assert_eq!(commands[4], "MAIL FROM:<sender@example.com>");
    }

    #[tokio::test]
    async fn test_starttls_not_offered() {
        let dialer = dialer(|b| b);
        let mut transport = MockTransport::new();
        transport.queue_response(mocks::ehlo_with(&[]));
        queue_transaction_tail(&mut transport);

        dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap();
        assert!(!transport.is_tls());

        let dialer = self::dialer(|b| b.tls(TlsMode::StartTlsRequired));
        let mut transport = MockTransport::new();
        transport.queue_response(mocks::ehlo_with(&[]));

        let err = dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::StarttlsNotSupported);
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let dialer = dialer(|b| b.tls(TlsMode::None));
        let mut transport = MockTransport::new();
        transport
            .queue_error(502, "5.5.2 EHLO not implemented")
            .queue_ok();
        queue_transaction_tail(&mut transport);

        dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap();

        let commands = transport.command_lines();
        assert_eq!(
            &commands[..3],
            &["EHLO localhost", "HELO localhost", "MAIL FROM:<sender@example.com>"]
        );
    }

    #[tokio::test]
    async fn test_auth_skipped_without_capability() {
        let dialer = dialer(|b| b.tls(TlsMode::None).credentials("user", "pw"));
        let mut transport = MockTransport::new();
        transport.queue_response(mocks::ehlo_with(&["SIZE 0"]));
        queue_transaction_tail(&mut transport);

        dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap();
        assert!(transport
            .command_lines()
            .iter()
            .all(|c| !c.starts_with("AUTH")));
    }

    #[tokio::test]
    async fn test_clear_text_auth_refused_on_remote_plain_connection() {
        let dialer = dialer(|b| b.tls(TlsMode::None).credentials("user", "pw"));
        let mut transport = MockTransport::new();
        transport.queue_response(mocks::ehlo_with(&["AUTH PLAIN LOGIN"]));

        let err = dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);
        assert_eq!(transport.command_lines(), vec!["EHLO localhost"]);
    }

    #[tokio::test]
    async fn test_clear_text_auth_allowed_on_loopback() {
        let config = SmtpConfig::builder()
            .host("127.0.0.1")
            .tls(TlsMode::None)
            .credentials("user", "pw")
            .build()
            .unwrap();
        let dialer = Dialer::from_config(&config);

        let mut transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_with(&["AUTH LOGIN"]))
            .queue_response(mocks::auth_continue_response("VXNlcm5hbWU6"))
            .queue_response(mocks::auth_continue_response("UGFzc3dvcmQ6"))
            .queue_response(mocks::auth_success_response());
        queue_transaction_tail(&mut transport);

        dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap();

        assert_eq!(transport.command_lines()[1], "AUTH LOGIN");
        assert_eq!(transport.received_data()[0], b"dXNlcg==\r\n");
        assert_eq!(transport.received_data()[1], b"cHc=\r\n");
    }

    #[tokio::test]
    async fn test_cram_md5_preferred() {
        let dialer = dialer(|b| b.tls(TlsMode::None).credentials("tim", "tanstaaftanstaaf"));
        let challenge = BASE64.encode("<1896.697170952@postoffice.reston.mci.net>");
        let mut transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_with(&["AUTH LOGIN PLAIN CRAM-MD5"]))
            .queue_response(mocks::auth_continue_response(&challenge))
            .queue_response(mocks::auth_success_response());
        queue_transaction_tail(&mut transport);

        dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap();

        assert_eq!(transport.command_lines()[1], "AUTH CRAM-MD5");
        let answer = String::from_utf8(transport.received_data()[0].clone()).unwrap();
        let decoded = BASE64.decode(answer.trim_end()).unwrap();
        assert_eq!(decoded, b"tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let dialer = dialer(|b| b.tls(TlsMode::None).credentials("user", "bad"));
        let mut transport = MockTransport::new();
        transport.fail_next_with(SmtpError::connection("unused"));
        let err = dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConnectionRefused);

        let config = SmtpConfig::builder()
            .host("localhost")
            .tls(TlsMode::None)
            .credentials("user", "bad")
            .build()
            .unwrap();
        let dialer = Dialer::from_config(&config);
        let mut transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_with(&["AUTH PLAIN"]))
            .queue_error(535, "5.7.8 Authentication credentials invalid");

        let err = dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::CredentialsInvalid);
        assert_eq!(err.smtp_code(), Some(535));
    }

    #[tokio::test]
    async fn test_rejected_recipient_aborts() {
        let dialer = dialer(|b| b.tls(TlsMode::None));
        let mut transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_with(&[]))
            .queue_ok()
            .queue_ok()
            .queue_error(550, "5.1.1 No such user");

        let err = dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap_err();

        assert_eq!(err.smtp_code(), Some(550));
        assert!(err.message().contains("hidden@example.com"));
        assert_eq!(transport.command_lines().last().unwrap(), "RSET");
        assert!(transport.received_data().is_empty());
    }

    #[tokio::test]
    async fn test_no_recipients_surfaces_relay_rejection() {
        let dialer = dialer(|b| b.tls(TlsMode::None));
        let mut message = mocks::encoded_message();
        message.envelope.recipients.clear();

        let mut transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_with(&[]))
            .queue_ok()
            .queue_error(554, "5.5.1 No valid recipients");

        let err = dialer.deliver(&mut transport, &message).await.unwrap_err();
        assert_eq!(err.smtp_code(), Some(554));
        assert_eq!(
            transport.command_lines(),
            vec!["EHLO localhost", "MAIL FROM:<sender@example.com>", "DATA"]
        );
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let dialer = dialer(|b| b.tls(TlsMode::None));
        let mut transport = MockTransport::new();
        transport.queue_response(mocks::ehlo_with(&["SIZE 10"]));

        let err = dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::MessageTooLarge);
    }

    #[tokio::test]
    async fn test_data_rejected() {
        let dialer = dialer(|b| b.tls(TlsMode::None));
        let mut transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_with(&[]))
            .queue_ok()
            .queue_ok()
            .queue_ok()
            .queue_response(mocks::data_ready_response())
            .queue_error(552, "5.3.4 Message too big");

        let err = dialer
            .deliver(&mut transport, &mocks::encoded_message())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::MessageTooLarge);
        assert!(!transport.is_closed());
    }
}
