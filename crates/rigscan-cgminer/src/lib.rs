//! rigscan cgminer - Management API client for cgminer/bmminer firmware
//!
//! Miners listen on TCP 4028 and answer one JSON command per connection.
//! This crate encodes commands, frames and leniently decodes replies, and
//! classifies the STATUS section so callers only see usable bodies.

pub mod client;
pub mod command;
pub mod error;
pub mod status;
pub mod transport;

pub use client::{ClientConfig, MinerClient, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS};
pub use command::{Command, CommandError};
pub use error::ProtocolError;
pub use status::{check_status, StatusCode, StatusEntry, StatusFailure};
pub use transport::{decode_response, TcpTransport};
