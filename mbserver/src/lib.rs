//! An async implementation of the server side of the [Modbus](http://modbus.org/) protocol
//! using [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Panic-free parsing
//! * One server instance serves any number of TCP, TLS and serial transports
//! * Every request is applied to the register memory by a single task, so concurrent
//!   clients never observe a partially applied write
//! * Per-instance function table with overridable handlers
//!
//! # Supported modes
//!
//! * TCP
//! * TLS (requires the `tls` feature)
//! * RTU over serial (requires the `serial` feature)
//!
//! # Supported Functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Coils
//! * Write Multiple Registers
//!
//! Any other function code can be served by registering a handler.
//!
//! # Example
//!
//! ```no_run
//! use mbserver::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new();
//!     server.memory_mut().input_registers_mut()[0] = 42;
//!
//!     let handle = server.spawn();
//!     handle.listen_tcp("127.0.0.1:502".parse()?).await?;
//!
//!     // update the memory in sequence with client requests
//!     handle
//!         .transaction(|memory| memory.input_registers_mut()[0] += 1)
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

mod common;
mod constants;
mod decode;
mod error;
mod exception;
mod serial;
mod server;
mod tcp;
mod types;

pub use crate::common::crc::checksum;
pub use crate::common::frame::Frame;
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::serial::frame::RtuFrame;
pub use crate::serial::{DataBits, FlowControl, FrameErrorPolicy, Parity, SerialSettings, StopBits};
pub use crate::server::*;
pub use crate::tcp::frame::TcpFrame;
#[cfg(feature = "tls")]
pub use crate::tcp::tls::TlsServerConfig;
pub use crate::types::*;
