use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{InvalidRequest, RequestError};
use crate::server::function::FunctionHandler;
use crate::server::node::NodeRegister;
use crate::server::session::{
    SessionTask, SERVER_DEFAULT_READ_TIMEOUT, SERVER_DEFAULT_WRITE_TIMEOUT,
};
use crate::server::{NodeMap, ServerCommon};
use crate::types::UnitId;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

struct RunningServer {
    shutdown: watch::Sender<bool>,
    done: oneshot::Receiver<()>,
}

/// A listening MODBUS/TCP server
///
/// Accepted connections each run their own session against the shared node
/// registry. [`TcpServer::close`] cancels the accept loop and returns after
/// every session has drained.
pub struct TcpServer {
    common: Arc<ServerCommon>,
    read_timeout: Duration,
    write_timeout: Duration,
    decode: DecodeLevel,
    running: tokio::sync::Mutex<Option<RunningServer>>,
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpServer {
    /// create a server with no nodes registered
    pub fn new() -> Self {
        Self {
            common: Arc::new(ServerCommon::default()),
            read_timeout: SERVER_DEFAULT_READ_TIMEOUT,
            write_timeout: SERVER_DEFAULT_WRITE_TIMEOUT,
            decode: DecodeLevel::nothing(),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// set the per-frame read deadline of every session
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// set the per-frame write deadline of every session
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// set what sessions decode into the log
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

    /// bind `address` and serve until [`TcpServer::close`] is called or a
    /// fatal accept error occurs
    ///
    /// Temporary accept errors back off exponentially from 5 ms to 1 s.
    pub async fn listen_and_serve(&self, address: &str) -> Result<(), RequestError> {
        let listener = TcpListener::bind(address).await?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut running = self.running.lock().await;
            if running.is_some() {
                return Err(InvalidRequest::ServerAlreadyRunning.into());
            }
            *running = Some(RunningServer {
                shutdown: shutdown_tx,
                done: done_rx,
            });
        }

        tracing::info!("server listening on {}", address);
        let mut sessions: JoinSet<()> = JoinSet::new();
        let mut backoff = ACCEPT_BACKOFF_MIN;

        let result = loop {
            tokio::select! {
                _ = crate::common::shutdown_signaled(&mut shutdown_rx) => {
                    tracing::info!("server shutdown");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        backoff = ACCEPT_BACKOFF_MIN;
                        tracing::info!("accepted connection from: {}", peer);
                        let mut session = SessionTask::new(
                            PhysLayer::new_tcp(socket, self.decode.physical),
                            self.common.clone(),
                            self.read_timeout,
                            self.write_timeout,
                            self.decode,
                            shutdown_rx.clone(),
                        );
                        sessions.spawn(async move {
                            let err = session.run().await;
                            tracing::info!("session from {} ended: {}", peer, err);
                        });
                    }
                    Err(err) if is_temporary_accept_error(&err) => {
                        tracing::warn!("temporary accept error: {}", err);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    }
                    Err(err) => {
                        tracing::error!("error accepting connection: {}", err);
                        break Err(err.into());
                    }
                }
            }
        };

        // stop accepting, then let every session unwind before reporting done
        drop(listener);
        while sessions.join_next().await.is_some() {}

        *self.running.lock().await = None;
        let _ = done_tx.send(());
        result
    }

    /// cancel the accept loop and wait for all sessions to end
    pub async fn close(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            let _ = running.done.await;
        }
    }
}

fn is_temporary_accept_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}
