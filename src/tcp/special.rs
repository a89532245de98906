use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{InvalidRequest, RequestError};
use crate::server::function::FunctionHandler;
use crate::server::node::NodeRegister;
use crate::server::session::{
    SessionTask, SERVER_DEFAULT_READ_TIMEOUT, SERVER_DEFAULT_WRITE_TIMEOUT,
};
use crate::server::{NodeMap, ServerCommon};
use crate::tcp::tls::TlsClientConfig;
use crate::types::UnitId;

/// default deadline for dialing the remote endpoint
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// default wait between failed connection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(60);
/// default period of the keep-alive callback
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

const STATUS_INITIAL: u8 = 0;
const STATUS_DISCONNECTED: u8 = 1;
const STATUS_CONNECTING: u8 = 2;
const STATUS_CONNECTED: u8 = 3;

/// called after a connection is established; returning an error drops the
/// connection and schedules a retry
pub type OnConnectHandler = Arc<dyn Fn() -> Result<(), RequestError> + Send + Sync>;
/// called after the session on a connection ends
pub type OnConnectionLostHandler = Arc<dyn Fn() + Send + Sync>;
/// called on every keep-alive tick while a session is running
pub type OnKeepAliveHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UrlScheme {
    Tcp,
    Tls,
}

/// A validated remote endpoint for [`TcpServerSpecial`]
///
/// Accepted forms: `tcp://host:port`, `ssl://`, `tls://` and `tcps://`
/// (all three TLS), a bare `host:port` (defaults to `tcp://`), and a bare
/// `:port` (defaults to `127.0.0.1`).
#[derive(Clone, Debug)]
pub struct RemoteServerUrl {
    scheme: UrlScheme,
    authority: String,
}

impl RemoteServerUrl {
    /// parse and validate an endpoint string
    pub fn parse(server: &str) -> Result<Self, InvalidRequest> {
        let mut server = server.to_string();
        if server.starts_with(':') {
            server = format!("127.0.0.1{server}");
        }
        if !server.contains("://") {
            server = format!("tcp://{server}");
        }

        let url = url::Url::parse(&server).map_err(|_| InvalidRequest::InvalidServerUrl)?;
        let scheme = match url.scheme() {
            "tcp" => UrlScheme::Tcp,
            "ssl" | "tls" | "tcps" => UrlScheme::Tls,
            _ => return Err(InvalidRequest::InvalidServerUrl),
        };
        let host = url.host_str().ok_or(InvalidRequest::InvalidServerUrl)?;
        let port = url.port().ok_or(InvalidRequest::InvalidServerUrl)?;

        Ok(Self {
            scheme,
            authority: format!("{host}:{port}"),
        })
    }

    fn is_tls(&self) -> bool {
        self.scheme == UrlScheme::Tls
    }
}

impl std::fmt::Display for RemoteServerUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            UrlScheme::Tcp => "tcp",
            UrlScheme::Tls => "tls",
        };
        write!(f, "{scheme}://{}", self.authority)
    }
}

/// A server-role peer that actively dials a remote endpoint and serves the
/// resulting connection
///
/// On connection loss it redials after a 500-1000 ms jitter; on failed
/// connection attempts it waits `reconnect_interval` (unless auto-reconnect
/// is disabled, in which case it stops). An optional keep-alive callback
/// fires periodically while a session is up.
pub struct TcpServerSpecial {
    common: Arc<ServerCommon>,
    remote: Option<RemoteServerUrl>,
    tls: Option<TlsClientConfig>,
    read_timeout: Duration,
    write_timeout: Duration,
    decode: DecodeLevel,
    connect_timeout: Duration,
    auto_reconnect: bool,
    reconnect_interval: Duration,
    keep_alive_enabled: bool,
    keep_alive_interval: Duration,
    on_connect: OnConnectHandler,
    on_connection_lost: OnConnectionLostHandler,
    on_keep_alive: OnKeepAliveHandler,
    status: Arc<AtomicU8>,
    ctl: std::sync::Mutex<Option<watch::Sender<bool>>>,
}

impl Default for TcpServerSpecial {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpServerSpecial {
    /// create an outbound-dialing server with no remote configured
    pub fn new() -> Self {
        Self {
            common: Arc::new(ServerCommon::default()),
            remote: None,
            tls: None,
            read_timeout: SERVER_DEFAULT_READ_TIMEOUT,
            write_timeout: SERVER_DEFAULT_WRITE_TIMEOUT,
            decode: DecodeLevel::nothing(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            keep_alive_enabled: false,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            on_connect: Arc::new(|| Ok(())),
            on_connection_lost: Arc::new(|| {}),
            on_keep_alive: Arc::new(|| {}),
            status: Arc::new(AtomicU8::new(STATUS_INITIAL)),
            ctl: std::sync::Mutex::new(None),
        }
    }

    /// register the remote endpoint to dial
    pub fn add_remote_server(&mut self, server: &str) -> Result<(), RequestError> {
        self.remote = Some(RemoteServerUrl::parse(server)?);
        Ok(())
    }

    /// set the TLS configuration used for `ssl`/`tls`/`tcps` remotes
    pub fn set_tls_config(&mut self, config: TlsClientConfig) {
        self.tls = Some(config);
    }

    /// set the dial deadline
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// set the wait between failed connection attempts
    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.reconnect_interval = interval;
    }

    /// enable or disable reconnecting after a failed connection attempt
    pub fn enable_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    /// configure the keep-alive callback; a zero interval keeps the default
    pub fn set_keep_alive(
        &mut self,
        enabled: bool,
        interval: Duration,
        handler: impl Fn() + Send + Sync + 'static,
    ) {
        self.keep_alive_enabled = enabled;
        if !interval.is_zero() {
            self.keep_alive_interval = interval;
        }
        self.on_keep_alive = Arc::new(handler);
    }

    /// set the connection-established callback
    pub fn set_on_connect(
        &mut self,
        handler: impl Fn() -> Result<(), RequestError> + Send + Sync + 'static,
    ) {
        self.on_connect = Arc::new(handler);
    }

    /// set the connection-lost callback
    pub fn set_on_connection_lost(&mut self, handler: impl Fn() + Send + Sync + 'static) {
        self.on_connection_lost = Arc::new(handler);
    }

    /// set the per-frame read deadline of the session
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// set the per-frame write deadline of the session
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// set what this server decodes into the log
    pub fn set_decode_level(&mut self, decode: DecodeLevel) {
        self.decode = decode;
    }

    /// the slave registry served by this server
    pub fn nodes(&self) -> &NodeMap {
        &self.common.nodes
    }

    /// register (or replace) a node, keyed by its unit id
    pub fn add_node(&self, node: NodeRegister) -> Arc<NodeRegister> {
        self.common.nodes.add_node(node)
    }

    /// register several nodes at once
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = NodeRegister>) {
        self.common.nodes.add_nodes(nodes)
    }

    /// look up a node by id
    pub fn get_node(&self, unit_id: UnitId) -> Option<Arc<NodeRegister>> {
        self.common.nodes.get_node(unit_id)
    }

    /// replace or extend the function dispatch table
    pub fn register_function_handler(&self, function_code: u8, handler: FunctionHandler) {
        self.common.functions.register(function_code, handler)
    }

    /// true while a session is running on an established connection
    pub fn is_connected(&self) -> bool {
        self.status.load(Ordering::SeqCst) == STATUS_CONNECTED
    }

    /// true when the server has never started or has fully stopped
    pub fn is_closed(&self) -> bool {
        self.status.load(Ordering::SeqCst) == STATUS_INITIAL
    }

    /// start connecting in the background; returns immediately
    pub fn start(&self) -> Result<(), RequestError> {
        let remote = self
            .remote
            .clone()
            .ok_or(InvalidRequest::InvalidServerUrl)?;

        // only an idle server may start
        if self
            .status
            .compare_exchange(
                STATUS_INITIAL,
                STATUS_DISCONNECTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.ctl.lock().unwrap() = Some(shutdown_tx);

        let task = ControlTask {
            common: self.common.clone(),
            remote,
            tls: self.tls.clone(),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            decode: self.decode,
            connect_timeout: self.connect_timeout,
            auto_reconnect: self.auto_reconnect,
            reconnect_interval: self.reconnect_interval,
            keep_alive_enabled: self.keep_alive_enabled,
            keep_alive_interval: self.keep_alive_interval,
            on_connect: self.on_connect.clone(),
            on_connection_lost: self.on_connection_lost.clone(),
            on_keep_alive: self.on_keep_alive.clone(),
            status: self.status.clone(),
            shutdown: shutdown_rx,
        };
        tokio::spawn(task.run());
        Ok(())
    }

    /// cancel the control task; the current session, if any, is torn down
    pub fn close(&self) {
        if let Some(shutdown) = self.ctl.lock().unwrap().take() {
            let _ = shutdown.send(true);
        }
    }
}

struct ControlTask {
    common: Arc<ServerCommon>,
    remote: RemoteServerUrl,
    tls: Option<TlsClientConfig>,
    read_timeout: Duration,
    write_timeout: Duration,
    decode: DecodeLevel,
    connect_timeout: Duration,
    auto_reconnect: bool,
    reconnect_interval: Duration,
    keep_alive_enabled: bool,
    keep_alive_interval: Duration,
    on_connect: OnConnectHandler,
    on_connection_lost: OnConnectionLostHandler,
    on_keep_alive: OnKeepAliveHandler,
    status: Arc<AtomicU8>,
    shutdown: watch::Receiver<bool>,
}

impl ControlTask {
    async fn run(mut self) {
        tracing::debug!("outbound server started");
        loop {
            if crate::common::is_shutdown(&self.shutdown) {
                break;
            }

            self.status.store(STATUS_CONNECTING, Ordering::SeqCst);
            tracing::debug!("connecting to {}", self.remote);
            let phys = match self.dial().await {
                Ok(phys) => phys,
                Err(err) => {
                    self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
                    tracing::error!("connect to {} failed: {}", self.remote, err);
                    if !self.auto_reconnect {
                        break;
                    }
                    if self.sleep_or_shutdown(self.reconnect_interval).await {
                        break;
                    }
                    continue;
                }
            };
            tracing::debug!("connected to {}", self.remote);

            let on_connect = self.on_connect.clone();
            match std::panic::catch_unwind(AssertUnwindSafe(|| on_connect())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!("connect callback rejected the connection: {}", err);
                    self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
                    if self.sleep_or_shutdown(self.reconnect_interval).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    tracing::error!("connect callback panicked, dropping the connection");
                    self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
                    if self.sleep_or_shutdown(self.reconnect_interval).await {
                        break;
                    }
                    continue;
                }
            }

            let keep_alive_stop = self.spawn_keep_alive();
            self.status.store(STATUS_CONNECTED, Ordering::SeqCst);

            let mut session = SessionTask::new(
                phys,
                self.common.clone(),
                self.read_timeout,
                self.write_timeout,
                self.decode,
                self.shutdown.clone(),
            );
            let reason = session.run().await;
            tracing::debug!("session ended: {}", reason);

            self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
            let on_lost = self.on_connection_lost.clone();
            if std::panic::catch_unwind(AssertUnwindSafe(|| on_lost())).is_err() {
                tracing::error!("connection-lost callback panicked");
            }
            if let Some(stop) = keep_alive_stop {
                let _ = stop.send(());
            }

            if crate::common::is_shutdown(&self.shutdown) {
                break;
            }

            // a random 500-1000 ms pause avoids hammering the remote with
            // rapid redials
            let jitter = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(500..1000))
            };
            if self.sleep_or_shutdown(jitter).await {
                break;
            }
        }

        self.status.store(STATUS_INITIAL, Ordering::SeqCst);
        tracing::debug!("outbound server stopped");
    }

    async fn dial(&self) -> Result<PhysLayer, RequestError> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(self.remote.authority.as_str()),
        )
        .await
        .map_err(|_| RequestError::Io(std::io::ErrorKind::TimedOut))??;

        if self.remote.is_tls() {
            let tls = self
                .tls
                .as_ref()
                .ok_or(RequestError::BadRequest(InvalidRequest::InvalidServerUrl))?;
            let stream = tokio::time::timeout(self.connect_timeout, tls.connect(stream))
                .await
                .map_err(|_| RequestError::Io(std::io::ErrorKind::TimedOut))??;
            Ok(PhysLayer::new_tls(stream, self.decode.physical))
        } else {
            Ok(PhysLayer::new_tcp(stream, self.decode.physical))
        }
    }

    fn spawn_keep_alive(&self) -> Option<tokio::sync::oneshot::Sender<()>> {
        if !self.keep_alive_enabled {
            return None;
        }

        let hook = self.on_keep_alive.clone();
        let interval = self.keep_alive_interval;
        let mut shutdown = self.shutdown.clone();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    _ = crate::common::shutdown_signaled(&mut shutdown) => break,
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if std::panic::catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                            tracing::error!("keep-alive callback panicked");
                        }
                    }
                }
            }
        });
        Some(stop_tx)
    }

    /// returns true if shutdown was signaled during the sleep
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = crate::common::shutdown_signaled(&mut self.shutdown) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_urls() {
        let url = RemoteServerUrl::parse("tcp://foobar.com:1204").unwrap();
        assert!(!url.is_tls());
        assert_eq!(url.authority, "foobar.com:1204");
    }

    #[test]
    fn bare_port_defaults_to_localhost() {
        let url = RemoteServerUrl::parse(":8502").unwrap();
        assert_eq!(url.authority, "127.0.0.1:8502");
    }

    #[test]
    fn missing_scheme_defaults_to_tcp() {
        let url = RemoteServerUrl::parse("10.0.0.7:502").unwrap();
        assert!(!url.is_tls());
        assert_eq!(url.authority, "10.0.0.7:502");
    }

    #[test]
    fn tls_aliases_are_recognized() {
        for scheme in ["ssl", "tls", "tcps"] {
            let url = RemoteServerUrl::parse(&format!("{scheme}://host.example:802")).unwrap();
            assert!(url.is_tls());
        }
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        assert_eq!(
            RemoteServerUrl::parse("udp://host:502").unwrap_err(),
            InvalidRequest::InvalidServerUrl
        );
    }

    #[test]
    fn start_without_a_remote_fails() {
        let server = TcpServerSpecial::new();
        assert!(server.is_closed());
        assert!(matches!(
            server.start(),
            Err(RequestError::BadRequest(InvalidRequest::InvalidServerUrl))
        ));
    }
}
