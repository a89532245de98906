//! A MODBUS protocol library built on [Tokio](https://docs.rs/tokio):
//!
//! * a client issuing function-code requests over TCP (MBAP), RTU
//!   (binary + CRC16) and ASCII (hex + LRC) transports
//! * an in-process TCP server with per-slave register banks, available as a
//!   classic listening server and as an outbound-dialing variant with
//!   auto-reconnect and keep-alive
//! * a polling engine that schedules periodic reads, segments oversize
//!   requests, and fans results out to a user handler
//!
//! # Supported functions
//!
//! Read Coils (0x01), Read Discrete Inputs (0x02), Read Holding Registers
//! (0x03), Read Input Registers (0x04), Write Single Coil (0x05), Write
//! Single Register (0x06), Write Multiple Coils (0x0F), Write Multiple
//! Registers (0x10), Mask Write Register (0x16), Read/Write Multiple
//! Registers (0x17) and, on the client request side, Read FIFO Queue (0x18).
//!
//! # Example client
//!
//! ```no_run
//! use polymodbus::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(TcpClientProvider::new("127.0.0.1:502"));
//!
//!     let coils = client
//!         .read_coils(UnitId::new(1), AddressRange::try_from(0, 10)?)
//!         .await?;
//!     println!("coils: {coils:?}");
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example server
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use polymodbus::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(TcpServer::new());
//!     server.add_node(NodeRegister::new(
//!         UnitId::new(1),
//!         RegisterLayout {
//!             coils: RegisterSpan::new(0, 64),
//!             holding_registers: RegisterSpan::new(0, 128),
//!             ..RegisterLayout::default()
//!         },
//!     ));
//!
//!     server.listen_and_serve("0.0.0.0:502").await?;
//!     Ok(())
//! }
//! ```

#![deny(
    overflowing_literals,
    non_camel_case_types,
    non_shorthand_field_patterns,
    non_snake_case,
    non_upper_case_globals,
    unreachable_pub,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![forbid(unsafe_code, while_true, bare_trait_objects)]

/// client API: the provider contract and its three transports
pub mod client;
/// public constant values related to the MODBUS specification
pub mod constants;
/// polling engine for periodic reads
pub mod poll;
/// prelude used to include all of the API types
pub mod prelude;
/// serial port settings shared by the RTU and ASCII transports
pub mod serial;
/// server API: register banks, the listening server and the
/// outbound-dialing server
pub mod server;

// internal modules
mod common;
mod decode;
mod error;
mod exception;
mod function;
mod tcp;
mod types;

pub use common::pdu::ProtocolDataUnit;
pub use decode::{AppDecodeLevel, DecodeLevel, FrameDecodeLevel, PhysDecodeLevel};
pub use error::{AduParseError, FrameParseError, InternalError, InvalidRequest, RequestError};
pub use exception::ExceptionCode;
pub use function::FunctionCode;
pub use types::{AddressRange, UnitId};
