//! Telnet 協定模組
//!
//! 連線管理、協定解碼與壓縮切換

mod client;
pub mod compression;
pub mod decoder;
mod inbound;
pub mod protocol;

pub use client::{ConnectionState, ServerEvent, TelnetClient, TelnetError};
pub use compression::{ByteSource, CompressionError};
pub use decoder::{DecodedEvent, NegotiationState, ProtocolDecoder};
pub use inbound::Inbound;
pub use protocol::{TelnetCommand, TelnetOption, IAC};
