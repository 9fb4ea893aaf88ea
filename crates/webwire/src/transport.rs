//! Byte-stream transport: plain TCP or TLS, plus buffered read primitives.
//!
//! [`Connector`] resolves a host and dials each endpoint in order, wrapping
//! the stream in TLS for secure targets. [`Transport`] owns the resulting
//! stream together with a receive buffer and exposes the read shapes the
//! connection driver needs: until-delimiter, exact count, and at-least-one.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::BytesMut;
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    DigitallySignedStruct, SignatureScheme,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::{lookup_host, TcpStream},
};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::debug;

use crate::{
    config::ClientConfig,
    error::{Error, Result},
    metrics,
};

/// A stream that may be wrapped in TLS.
#[allow(clippy::large_enum_variant)]
pub(crate) enum MaybeTlsStream<S> {
    Plain(S),
    Tls(TlsStream<S>),
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// The transport used by live connections.
pub(crate) type NetTransport = Transport<MaybeTlsStream<TcpStream>>;

/// Dials targets and performs the optional TLS handshake.
pub(crate) struct Connector {
    tls: TlsConnector,
}

impl Connector {
    pub fn new(config: &ClientConfig) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        if config.danger_disable_tls_verification {
            tls_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerifier));
        }
        tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Self {
            tls: TlsConnector::from(Arc::new(tls_config)),
        }
    }

    /// Resolves `host` to an ordered list of endpoints.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<std::net::SocketAddr>> {
        let endpoints: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|_| Error::Resolve {
                host: host.to_string(),
            })?
            .collect();
        if endpoints.is_empty() {
            return Err(Error::Resolve {
                host: host.to_string(),
            });
        }
        Ok(endpoints)
    }

    /// Attempts each endpoint in order; on success the secure path runs the
    /// TLS handshake before returning.
    pub async fn dial(
        &self,
        endpoints: Vec<std::net::SocketAddr>,
        host: &str,
        secure: bool,
    ) -> Result<NetTransport> {
        let mut last_error = None;
        let mut stream = None;
        for endpoint in endpoints {
            debug!(%endpoint, "connecting");
            match TcpStream::connect(endpoint).await {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(error) => {
                    debug!(%endpoint, %error, "connect failed, trying next endpoint");
                    last_error = Some(error);
                }
            }
        }
        let Some(stream) = stream else {
            let error = last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "no endpoints to dial")
            });
            return Err(error.into());
        };

        let stream = if secure {
            let name = ServerName::try_from(host.to_string())
                .map_err(|_| rustls::Error::General("invalid server name".to_string()))?;
            MaybeTlsStream::Tls(self.tls.connect(name, stream).await?)
        } else {
            MaybeTlsStream::Plain(stream)
        };

        Ok(Transport::new(stream))
    }
}

/// Buffered byte-stream with the async read shapes of the state machine.
pub(crate) struct Transport<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Reads until the buffer contains `delimiter` and returns everything up
    /// to and including it. Bytes past the delimiter stay buffered.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<BytesMut> {
        let mut searched = 0;
        loop {
            if self.buffer.len() >= delimiter.len() {
                if let Some(at) = self.buffer[searched..]
                    .windows(delimiter.len())
                    .position(|window| window == delimiter)
                {
                    return Ok(self.buffer.split_to(searched + at + delimiter.len()));
                }
                searched = self.buffer.len() - delimiter.len() + 1;
            }
            self.fill(1).await?;
        }
    }

    /// Reads until `count` bytes are buffered and returns exactly that many.
    pub async fn read_exactly(&mut self, count: usize) -> Result<BytesMut> {
        while self.buffer.len() < count {
            self.fill(count - self.buffer.len()).await?;
        }
        Ok(self.buffer.split_to(count))
    }

    /// Reads at least one byte into the buffer. Returns the number of new
    /// bytes; zero means the peer closed the stream.
    pub async fn read_some(&mut self) -> Result<usize> {
        self.buffer.reserve(4 * 1024);
        let count = self.stream.read_buf(&mut self.buffer).await?;
        metrics::record_recv(count);
        Ok(count)
    }

    /// Already-buffered bytes, available for draining without a read.
    pub fn buffered(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        metrics::record_sent(bytes.len());
        Ok(())
    }

    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    async fn fill(&mut self, at_least: usize) -> Result<()> {
        self.buffer.reserve(at_least.max(4 * 1024));
        let count = self.stream.read_buf(&mut self.buffer).await?;
        metrics::record_recv(count);
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )
            .into());
        }
        Ok(())
    }
}

/// Certificate verifier that accepts anything; gated behind
/// [`ClientConfig::danger_disable_tls_verification`].
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn read_until_returns_delimiter_and_keeps_remainder() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = Transport::new(client);

        server.write_all(b"HTTP/1.1 200 OK\r\n\r\nbody").await.unwrap();

        let head = transport.read_until(b"\r\n\r\n").await.unwrap();
        assert_eq!(&head[..], b"HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(&transport.buffered()[..], b"body");
    }

    #[tokio::test]
    async fn read_until_spans_partial_writes() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = Transport::new(client);

        let writer = tokio::spawn(async move {
            server.write_all(b"abc\r").await.unwrap();
            server.write_all(b"\ndef").await.unwrap();
            server
        });

        let line = transport.read_until(b"\r\n").await.unwrap();
        assert_eq!(&line[..], b"abc\r\n");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn read_exactly_waits_for_count() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = Transport::new(client);

        server.write_all(b"hello world").await.unwrap();
        let five = transport.read_exactly(5).await.unwrap();
        assert_eq!(&five[..], b"hello");
        let rest = transport.read_exactly(6).await.unwrap();
        assert_eq!(&rest[..], b" world");
    }

    #[tokio::test]
    async fn eof_mid_read_is_an_error() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = Transport::new(client);

        server.write_all(b"hel").await.unwrap();
        drop(server);

        assert!(transport.read_exactly(5).await.is_err());
    }

    #[tokio::test]
    async fn read_some_reports_eof_as_zero() {
        let (client, server) = tokio::io::duplex(256);
        let mut transport = Transport::new(client);
        drop(server);
        assert_eq!(transport.read_some().await.unwrap(), 0);
    }
}
