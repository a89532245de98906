//! One-stop import for applications: `use polymodbus::prelude::*;`

pub use crate::client::{AsciiClientProvider, Client, ClientProvider, RtuClientProvider, TcpClientProvider};
pub use crate::poll::{
    GatherHandler, GatherJob, GatherResult, NopHandler, PollConfig, PollEngine,
};
pub use crate::serial::SerialSettings;
pub use crate::server::{
    NodeMap, NodeRegister, RegisterLayout, RegisterSpan, RemoteServerUrl, TcpServer,
    TcpServerSpecial, TlsClientConfig,
};
pub use crate::{
    AddressRange, AppDecodeLevel, DecodeLevel, ExceptionCode, FrameDecodeLevel, FunctionCode,
    PhysDecodeLevel, ProtocolDataUnit, RequestError, UnitId,
};
