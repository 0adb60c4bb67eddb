//! Protocol client errors

use rigscan_core::RawResponse;
use std::net::SocketAddr;
use thiserror::Error;

use crate::command::CommandError;
use crate::status::StatusFailure;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] CommandError),
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Connection to {0} timed out")]
    ConnectTimeout(SocketAddr),
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("{0} closed the connection without a response")]
    EmptyResponse(SocketAddr),
    #[error("Miner warning: {0}")]
    Warning(StatusFailure),
    #[error("Miner error: {0}")]
    Rejected(StatusFailure),
    #[error("Miner fatal error: {0}")]
    Fatal(StatusFailure),
    #[error("Unrecognized response: {0}")]
    Unknown(Box<RawResponse>),
}

impl ProtocolError {
    /// Failures of the connection itself, before a reply could be judged
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_)
                | Self::Connect { .. }
                | Self::Io { .. }
                | Self::EmptyResponse(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Worth asking again: transport hiccups and W/E replies
    pub fn is_retryable(&self) -> bool {
        self.is_transport() || matches!(self, Self::Warning(_) | Self::Rejected(_))
    }

    /// The STATUS failure reported by the miner, if this is one
    pub fn status(&self) -> Option<&StatusFailure> {
        match self {
            Self::Warning(failure) | Self::Rejected(failure) | Self::Fatal(failure) => {
                Some(failure)
            }
            _ => None,
        }
    }
}
