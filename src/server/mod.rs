pub(crate) mod function;
pub(crate) mod map;
pub(crate) mod node;
pub(crate) mod session;

pub use self::function::FunctionHandler;
pub use self::map::NodeMap;
pub use self::node::{NodeRegister, RegisterLayout, RegisterSpan};
pub use self::session::{SERVER_DEFAULT_READ_TIMEOUT, SERVER_DEFAULT_WRITE_TIMEOUT};

pub use crate::tcp::server::TcpServer;
pub use crate::tcp::special::{
    OnConnectHandler, OnConnectionLostHandler, OnKeepAliveHandler, RemoteServerUrl,
    TcpServerSpecial, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE_INTERVAL,
    DEFAULT_RECONNECT_INTERVAL,
};
pub use crate::tcp::tls::TlsClientConfig;

use std::sync::Arc;

use self::function::FunctionTable;

/// State shared by every server flavor: the slave registry and the function
/// dispatch table
#[derive(Default)]
pub(crate) struct ServerCommon {
    pub(crate) nodes: Arc<NodeMap>,
    pub(crate) functions: FunctionTable,
}
