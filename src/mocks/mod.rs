//! Mock transport and fixtures for testing the SMTP transaction offline.

use async_trait::async_trait;
use std::collections::VecDeque;

use crate::errors::{SmtpError, SmtpResult};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::SmtpTransport;
use crate::types::{EncodedMessage, Envelope};

/// Mock SMTP transport that replays queued replies and records traffic.
#[derive(Debug)]
pub struct MockTransport {
    /// Recorded commands.
    commands: Vec<SmtpCommand>,
    /// Queued replies.
    responses: VecDeque<SmtpResponse>,
    /// Reply used when the queue is empty.
    default_response: SmtpResponse,
    /// Server capabilities.
    capabilities: Option<EsmtpCapabilities>,
    /// TLS enabled.
    tls_enabled: bool,
    /// Host passed to the last TLS upgrade.
    tls_host: Option<String>,
    /// Raw data received.
    data_received: Vec<Vec<u8>>,
    /// Error returned by the next call.
    fail_next: Option<SmtpError>,
    /// Set once `close` has been called.
    closed: bool,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            responses: VecDeque::new(),
            default_response: SmtpResponse::new(codes::OK, "OK"),
            capabilities: None,
            tls_enabled: false,
            tls_host: None,
            data_received: Vec::new(),
            fail_next: None,
            closed: false,
        }
    }

    /// Queues a reply.
    pub fn queue_response(&mut self, response: SmtpResponse) -> &mut Self {
        self.responses.push_back(response);
        self
    }

    /// Queues a 250 OK reply.
    pub fn queue_ok(&mut self) -> &mut Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues an error reply.
    pub fn queue_error(&mut self, code: u16, message: &str) -> &mut Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Makes the next call fail.
    pub fn fail_next_with(&mut self, error: SmtpError) -> &mut Self {
        self.fail_next = Some(error);
        self
    }

    /// Returns recorded commands.
    pub fn recorded_commands(&self) -> &[SmtpCommand] {
        &self.commands
    }

    /// Returns recorded commands as wire strings.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.to_smtp_string()).collect()
    }

    /// Returns received data.
    pub fn received_data(&self) -> &[Vec<u8>] {
        &self.data_received
    }

    /// Returns the host of the last TLS upgrade.
    pub fn tls_host(&self) -> Option<&str> {
        self.tls_host.as_deref()
    }

    /// Returns true once the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn next_response(&mut self) -> SmtpResponse {
        self.responses
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }

    fn take_failure(&mut self) -> SmtpResult<()> {
        match self.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        self.take_failure()?;
        self.commands.push(command.clone());
        Ok(self.next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.take_failure()?;
        self.data_received.push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        self.take_failure()?;
        Ok(self.next_response())
    }

    async fn upgrade_tls(&mut self, host: &str) -> SmtpResult<()> {
        self.take_failure()?;
        self.tls_enabled = true;
        self.tls_host = Some(host.to_string());
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        if !self.closed {
            self.commands.push(SmtpCommand::Quit);
            self.closed = true;
        }
        Ok(())
    }

    fn capabilities(&self) -> Option<&EsmtpCapabilities> {
        self.capabilities.as_ref()
    }

    fn set_capabilities(&mut self, caps: EsmtpCapabilities) {
        self.capabilities = Some(caps);
    }
}

/// Creates an EHLO reply advertising the given extension lines.
pub fn ehlo_with(extensions: &[&str]) -> SmtpResponse {
    let mut lines = vec!["smtp.example.com Hello"];
    lines.extend_from_slice(extensions);
    SmtpResponse::multiline(codes::OK, lines)
}

/// Creates an EHLO reply with standard capabilities.
pub fn ehlo_response() -> SmtpResponse {
    ehlo_with(&[
        "SIZE 10485760",
        "AUTH PLAIN LOGIN CRAM-MD5",
        "STARTTLS",
        "8BITMIME",
        "ENHANCEDSTATUSCODES",
    ])
}

/// Creates a STARTTLS ready reply.
pub fn starttls_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_READY, "Ready to start TLS")
}

/// Creates an authentication success reply.
pub fn auth_success_response() -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_SUCCESS, "Authentication successful")
}

/// Creates a DATA ready reply.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input")
}

/// Creates an AUTH continue reply.
pub fn auth_continue_response(challenge: &str) -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_CONTINUE, challenge)
}

/// Creates a small encoded message for two recipients.
pub fn encoded_message() -> EncodedMessage {
    EncodedMessage {
        message_id: "test-id@example.com".to_string(),
        envelope: Envelope {
            from: "sender@example.com".to_string(),
            recipients: vec![
                "to@example.com".to_string(),
                "hidden@example.com".to_string(),
            ],
        },
        data: b"From: sender@example.com\r\nTo: to@example.com\r\nSubject: Test\r\n\r\n.hello\r\n"
            .to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport() {
        let mut transport = MockTransport::new();
        transport.queue_response(ehlo_response()).queue_error(550, "no");

        let response = transport
            .send_command(&SmtpCommand::Ehlo("test".to_string()))
            .await
            .unwrap();
        assert_eq!(response.code, 250);

        let response = transport.send_command(&SmtpCommand::Rset).await.unwrap();
        assert_eq!(response.code, 550);

        let response = transport.send_command(&SmtpCommand::Data).await.unwrap();
        assert_eq!(response.code, 250);

        assert_eq!(transport.command_lines(), vec!["EHLO test", "RSET", "DATA"]);
    }

    #[tokio::test]
    async fn test_mock_transport_failure() {
        let mut transport = MockTransport::new();
        transport.fail_next_with(SmtpError::connection("Test failure"));

        assert!(transport.send_command(&SmtpCommand::Quit).await.is_err());
        assert!(transport.send_command(&SmtpCommand::Quit).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_close_records_quit_once() {
        let mut transport = MockTransport::new();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert_eq!(transport.recorded_commands(), &[SmtpCommand::Quit]);
    }
}
