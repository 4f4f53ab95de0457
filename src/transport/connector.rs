use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Connection attempts made before giving up on a single connect.
pub const CONNECT_ATTEMPTS: u32 = 5;

/// Pause between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Any bidirectional byte stream a session can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;

/// Opens fresh connections to the recognition server.
///
/// Implementations:
/// - `TcpConnector`: plain TCP, or TLS when the port is 443
/// - test doubles that hand out in-memory streams
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection
    async fn connect(&self) -> Result<BoxedStream, TransportError>;

    /// Peer description for logging
    fn describe(&self) -> String;
}

/// Dials the server over TCP, optionally wrapping the socket in TLS.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub ipv4_only: bool,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: port == 443,
            ipv4_only: false,
        }
    }

    pub fn ipv4_only(mut self, ipv4_only: bool) -> Self {
        self.ipv4_only = ipv4_only;
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    async fn resolve(&self) -> Result<Vec<SocketAddr>, std::io::Error> {
        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        Ok(addrs
            .filter(|addr| !self.ipv4_only || addr.is_ipv4())
            .collect())
    }

    async fn dial(&self) -> Result<TcpStream, TransportError> {
        let mut last_error = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            debug!(
                "Trying to connect {} (attempt {}/{})",
                self.describe(),
                attempt,
                CONNECT_ATTEMPTS
            );

            let result = match self.resolve().await {
                Ok(addrs) if addrs.is_empty() => {
                    return Err(TransportError::NoAddress(self.describe()))
                }
                Ok(addrs) => TcpStream::connect(addrs.as_slice()).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    warn!("Connect to {} failed: {}", self.describe(), e);
                    last_error = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(TransportError::Connect {
            addr: self.describe(),
            attempts: CONNECT_ATTEMPTS,
            source: last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "no connection attempt made")
            }),
        })
    }

    fn tls_connector() -> TlsConnector {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream, TransportError> {
        let tcp = self.dial().await?;

        if !self.tls {
            info!("Connected to {}", self.describe());
            return Ok(Box::new(tcp));
        }

        let name = ServerName::try_from(self.host.clone())
            .map_err(|e| TransportError::Tls(format!("invalid server name {}: {}", self.host, e)))?;
        let stream = Self::tls_connector()
            .connect(name, tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        info!("Connected to {} over TLS", self.describe());
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
