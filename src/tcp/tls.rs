use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::rustls;

use crate::error::InvalidRequest;

/// TLS configuration used when an outbound-dialing server connects to a
/// `tls://` / `ssl://` / `tcps://` remote
#[derive(Clone)]
pub struct TlsClientConfig {
    name: rustls::ServerName,
    config: Arc<rustls::ClientConfig>,
}

impl TlsClientConfig {
    /// wrap a prebuilt rustls client configuration and the name to present
    /// during the handshake
    pub fn new(
        server_name: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> Result<Self, InvalidRequest> {
        let name = rustls::ServerName::try_from(server_name)
            .map_err(|_| InvalidRequest::InvalidServerUrl)?;
        Ok(Self { name, config })
    }

    pub(crate) async fn connect(
        &self,
        socket: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, std::io::Error> {
        let connector = tokio_rustls::TlsConnector::from(self.config.clone());
        connector.connect(self.name.clone(), socket).await
    }
}

impl std::fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClientConfig").finish_non_exhaustive()
    }
}
