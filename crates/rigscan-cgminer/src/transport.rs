//! One-shot TCP exchange with a miner's management API
//!
//! The API has no length prefix: the miner writes its reply and either
//! closes the socket or simply stops talking. We read until EOF or until the
//! line has been idle for `idle_timeout`.

use rigscan_core::RawResponse;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::ProtocolError;

const READ_CHUNK: usize = 4096;

pub struct TcpTransport {
    target: SocketAddr,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl TcpTransport {
    pub fn new(target: SocketAddr, connect_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            target,
            connect_timeout,
            idle_timeout,
        }
    }

    /// Open a connection, send `request` and collect the raw reply bytes
    pub async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(self.target)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ProtocolError::Connect {
                    addr: self.target,
                    source,
                })
            }
            Err(_) => return Err(ProtocolError::ConnectTimeout(self.target)),
        };

        trace!(addr = %self.target, len = request.len(), "Sending API request");

        stream
            .write_all(request)
            .await
            .map_err(|source| ProtocolError::Io {
                addr: self.target,
                source,
            })?;

        let body = read_until_idle(&mut stream, self.idle_timeout)
            .await
            .map_err(|source| ProtocolError::Io {
                addr: self.target,
                source,
            })?;

        debug!(addr = %self.target, len = body.len(), "Received API response");

        if body.is_empty() {
            return Err(ProtocolError::EmptyResponse(self.target));
        }
        Ok(body)
    }
}

/// Read until EOF or until no bytes arrive for `idle`.
///
/// A read error after some data has arrived ends the reply instead of
/// failing it; some firmware resets the connection right after writing.
pub async fn read_until_idle<R>(reader: &mut R, idle: Duration) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match timeout(idle, reader.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => body.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) if body.is_empty() => return Err(e),
            Ok(Err(e)) => {
                debug!(error = %e, len = body.len(), "Read error after partial reply");
                break;
            }
        }
    }
    Ok(body)
}

/// Decode reply bytes leniently.
///
/// NUL padding is dropped and invalid UTF-8 replaced. With `repair` set,
/// back-to-back objects (`}{`) get a comma inserted when the first parse
/// fails. Anything still undecodable comes back as text.
pub fn decode_response(bytes: &[u8], repair: bool) -> RawResponse {
    let cleaned: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
    let text = String::from_utf8_lossy(&cleaned).into_owned();

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        return RawResponse::Structured(value);
    }
    if repair && text.contains("}{") {
        if let Ok(value) = serde_json::from_str::<Value>(&text.replace("}{", "},{")) {
            return RawResponse::Structured(value);
        }
    }
    RawResponse::Text(text)
}
