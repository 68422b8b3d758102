//! Connection manager: owns the transport, frames inbound bytes into
//! messages and writes outbound ones.
//!
//! The connection is owned by exactly one client and every write goes
//! through `&mut self`, so outgoing lines can never interleave.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{CodecError, IrcCodec};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::irc::Message;

/// Whether a rustls crypto provider was compiled in.
pub const TLS_AVAILABLE: bool = cfg!(any(feature = "aws-lc-rs", feature = "ring"));

/// The byte stream under a connection.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// In-process stream, used by tests and embedders that bring their own
    /// transport. Cannot be upgraded.
    Duplex(DuplexStream),
}

impl Transport {
    pub fn is_secure(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
            Transport::Duplex(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
            Transport::Duplex(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
            Transport::Duplex(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
            Transport::Duplex(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

pub struct Connection {
    transport: Transport,
    codec: IrcCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    peer: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("secure", &self.transport.is_secure())
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}

impl Connection {
    /// Open TCP (and TLS when `use_secure_transport` is set) to the
    /// configured endpoint, bounded by `connect_timeout`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let addr = config.server_addr();
        let mode = if config.use_secure_transport { "TLS" } else { "plain" };
        tracing::debug!(%addr, mode, "connecting");

        let transport = tokio::time::timeout(config.connect_timeout(), establish(config, &addr))
            .await
            .map_err(|_| Error::ConnectTimeout { addr: addr.clone() })??;

        tracing::debug!(%addr, mode, "connected");
        Ok(Self::from_transport(transport, addr))
    }

    pub fn from_transport(transport: Transport, peer: impl Into<String>) -> Self {
        Self {
            transport,
            codec: IrcCodec,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(1024),
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_secure(&self) -> bool {
        self.transport.is_secure()
    }

    /// Wait for at least one complete message.
    ///
    /// Returns every message already framed in the buffer; a partial
    /// trailing line stays buffered for the next call. An empty read or a
    /// reset is reported as [`Error::Disconnected`].
    pub async fn receive(&mut self) -> Result<Vec<Message>> {
        loop {
            let messages = self.drain_frames()?;
            if !messages.is_empty() {
                return Ok(messages);
            }
            match self.transport.read_buf(&mut self.read_buf).await {
                Ok(0) => return Err(Error::Disconnected),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    return Err(Error::Disconnected);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn drain_frames(&mut self) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(msg)) => {
                    tracing::trace!(peer = %self.peer, "> {msg}");
                    out.push(msg);
                }
                Ok(None) => return Ok(out),
                Err(CodecError::Parse(e)) => {
                    tracing::debug!(peer = %self.peer, error = %e, "skipping malformed line");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Serialize and write one message.
    pub async fn send_frame(&mut self, msg: &Message) -> Result<()> {
        Encoder::<&Message>::encode(&mut self.codec, msg, &mut self.write_buf)?;
        tracing::trace!(peer = %self.peer, "< {msg}");
        let data = self.write_buf.split();
        self.transport.write_all(&data).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Switch a plain TCP connection to TLS in place (after STARTTLS).
    ///
    /// Anything already buffered from the plaintext stream is discarded;
    /// the server must not send more after 670.
    pub async fn upgrade(self, host: &str, insecure: bool) -> Result<Self> {
        let Connection { transport, peer, .. } = self;
        let tcp = match transport {
            Transport::Plain(tcp) => tcp,
            _ => return Err(Error::UpgradeUnsupported),
        };
        let tls = tls_handshake(tcp, host, insecure).await?;
        tracing::debug!(%peer, "transport upgraded to TLS");
        Ok(Self::from_transport(Transport::Tls(Box::new(tls)), peer))
    }

    pub fn can_upgrade(&self) -> bool {
        matches!(self.transport, Transport::Plain(_))
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.transport.shutdown().await?;
        Ok(())
    }
}

async fn establish(config: &ClientConfig, addr: &str) -> Result<Transport> {
    let tcp = TcpStream::connect(addr).await?;
    if config.use_secure_transport {
        let tls = tls_handshake(tcp, config.host(), config.tls_insecure).await?;
        Ok(Transport::Tls(Box::new(tls)))
    } else {
        Ok(Transport::Plain(tcp))
    }
}

async fn tls_handshake(tcp: TcpStream, host: &str, insecure: bool) -> Result<TlsStream<TcpStream>> {
    if !TLS_AVAILABLE {
        return Err(Error::TlsUnavailable);
    }
    let tls_config = if insecure {
        tracing::debug!("TLS: insecure mode (skipping cert verification)");
        rustls_insecure_config()
    } else {
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string()).map_err(|e| {
        Error::Tls {
            host: host.to_string(),
            reason: e.to_string(),
        }
    })?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls {
            host: host.to_string(),
            reason: e.to_string(),
        })
}

fn install_crypto_provider() {
    // ring wins when both are enabled.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}
