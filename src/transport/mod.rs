//! Transport layer for SMTP connections.
//!
//! Provides the [`SmtpTransport`] abstraction the dialer drives, and a TCP
//! implementation with optional implicit TLS or STARTTLS upgrade.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{SmtpConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + Sync + fmt::Debug {
    /// Sends a command and receives the reply.
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse>;

    /// Sends raw bytes (message content, SASL continuation lines).
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Reads a reply from the server.
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse>;

    /// Upgrades the connection to TLS, verifying the certificate for `host`.
    async fn upgrade_tls(&mut self, host: &str) -> SmtpResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Sends QUIT and shuts the connection down.
    async fn close(&mut self) -> SmtpResult<()>;

    /// Returns the server capabilities.
    fn capabilities(&self) -> Option<&EsmtpCapabilities>;

    /// Sets the server capabilities.
    fn set_capabilities(&mut self, caps: EsmtpCapabilities);
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream.
    stream: TransportStream,
    /// Command timeout.
    command_timeout: Duration,
    /// TLS handshake timeout.
    handshake_timeout: Duration,
    /// Server capabilities.
    capabilities: Option<EsmtpCapabilities>,
    /// Server host.
    host: String,
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
    /// Transient state while the plain stream is handed to the TLS
    /// handshake, and the final state after a failed upgrade or close.
    Closed,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.is_tls())
            .finish()
    }
}

impl TcpTransport {
    /// Connects to an SMTP relay and reads its greeting.
    ///
    /// With [`TlsMode::Implicit`] the TLS handshake happens before the
    /// greeting is read.
    pub async fn connect(config: &SmtpConfig) -> SmtpResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                SmtpError::timeout(
                    SmtpErrorKind::ConnectTimeout,
                    format!("Connect to {} timed out", address),
                )
            })?
            .map_err(|e| Self::map_io_error(e, &address))?;

        stream.set_nodelay(true).ok();
        tracing::debug!(address = %address, "Connected");

        let mut transport = Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            command_timeout: config.command_timeout,
            handshake_timeout: config.connect_timeout,
            capabilities: None,
            host: config.host.clone(),
        };

        if config.tls == TlsMode::Implicit {
            transport.upgrade_tls(&config.host).await?;
        }

        let greeting = transport.read_response().await?;
        if !greeting.is_success() {
            return Err(greeting.to_error());
        }

        Ok(transport)
    }

    /// Maps IO errors to SMTP errors.
    fn map_io_error(error: io::Error, address: &str) -> SmtpError {
        let mapped = match error.kind() {
            io::ErrorKind::ConnectionRefused => SmtpError::new(
                SmtpErrorKind::ConnectionRefused,
                format!("Connection refused to {}", address),
            ),
            io::ErrorKind::TimedOut => SmtpError::timeout(
                SmtpErrorKind::ConnectTimeout,
                format!("Connect to {} timed out", address),
            ),
            io::ErrorKind::ConnectionReset => {
                SmtpError::new(SmtpErrorKind::ConnectionReset, "Connection reset by server")
            }
            _ => SmtpError::connection(format!("Could not connect to {}: {}", address, error)),
        };
        mapped.with_cause(error)
    }

    /// Reads lines until a complete reply has arrived.
    async fn read_response_inner<R: AsyncBufReadExt + Unpin>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let read = timeout(timeout_duration, reader.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ReadTimeout, "Read timed out"))?
                .map_err(|e| SmtpError::protocol(format!("Read error: {}", e)))?;

            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }

            let line = line.trim_end().to_string();

            // code-hyphen marks a continuation line
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    /// Writes data to the stream.
    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> SmtpResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Write timed out"))?
            .map_err(|e| SmtpError::protocol(format!("Write error: {}", e)))?;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Flush timed out"))?
            .map_err(|e| SmtpError::protocol(format!("Flush error: {}", e)))?;

        Ok(())
    }

    fn closed_error() -> SmtpError {
        SmtpError::new(SmtpErrorKind::ConnectionReset, "Connection is closed")
    }

    async fn write_raw(&mut self, data: &[u8]) -> SmtpResult<()> {
        match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            TransportStream::Closed => Err(Self::closed_error()),
        }
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        tracing::debug!(command = %command.redacted(), "C:");

        let line = format!("{}\r\n", command.to_smtp_string());
        self.write_raw(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.write_raw(data).await
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let response = match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::read_response_inner(stream, self.command_timeout).await?
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => {
                Self::read_response_inner(stream.as_mut(), self.command_timeout).await?
            }
            TransportStream::Closed => return Err(Self::closed_error()),
        };

        tracing::debug!(code = response.code, message = %response.first_message(), "S:");

        Ok(response)
    }

    async fn upgrade_tls(&mut self, host: &str) -> SmtpResult<()> {
        if self.is_tls() {
            return Ok(());
        }

        #[cfg(feature = "rustls-tls")]
        {
            use rustls::pki_types::ServerName;
            use std::sync::Arc;

            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", host)))?;

            let tcp_stream = match std::mem::replace(&mut self.stream, TransportStream::Closed) {
                TransportStream::Plain(reader) => reader.into_inner(),
                other => {
                    self.stream = other;
                    return Err(SmtpError::tls("Connection is not in plain text mode"));
                }
            };

            let tls_stream = timeout(
                self.handshake_timeout,
                connector.connect(server_name, tcp_stream),
            )
            .await
            .map_err(|_| {
                SmtpError::timeout(SmtpErrorKind::ConnectTimeout, "TLS handshake timed out")
            })?
            .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)))?;

            self.stream = TransportStream::Tls(Box::new(BufReader::new(tls_stream)));
            tracing::debug!(host = %host, "TLS established");

            Ok(())
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            let _ = host;
            Err(SmtpError::configuration("No TLS implementation available"))
        }
    }

    fn is_tls(&self) -> bool {
        #[cfg(feature = "rustls-tls")]
        {
            matches!(self.stream, TransportStream::Tls(_))
        }
        #[cfg(not(feature = "rustls-tls"))]
        {
            false
        }
    }

    async fn close(&mut self) -> SmtpResult<()> {
        if matches!(self.stream, TransportStream::Closed) {
            return Ok(());
        }

        let result = self.send_command(&SmtpCommand::Quit).await;
        match &mut self.stream {
            TransportStream::Plain(stream) => {
                let _ = stream.get_mut().shutdown().await;
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => {
                let _ = stream.get_mut().shutdown().await;
            }
            TransportStream::Closed => {}
        }
        self.stream = TransportStream::Closed;

        // A relay that drops the connection on QUIT has still delivered.
        if let Err(e) = result {
            tracing::debug!(error = %e, "QUIT was not acknowledged");
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
