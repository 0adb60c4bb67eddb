//! Miner API client

use rigscan_core::{
    build_record, extract_pools, extract_version, MinerEndpoint, NormalizedRecord, PoolInfo,
    RawResponse, VersionInfo,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::ProtocolError;
use crate::status::check_status;
use crate::transport::{decode_response, TcpTransport};

/// Default connect timeout for queries
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Default idle timeout while reading a reply
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
        }
    }
}

/// Talks to one miner. Each call opens its own connection.
#[derive(Debug, Clone)]
pub struct MinerClient {
    endpoint: MinerEndpoint,
    config: ClientConfig,
}

impl MinerClient {
    pub fn new(endpoint: MinerEndpoint) -> Self {
        Self::with_config(endpoint, ClientConfig::default())
    }

    pub fn with_config(endpoint: MinerEndpoint, config: ClientConfig) -> Self {
        Self { endpoint, config }
    }

    pub fn endpoint(&self) -> &MinerEndpoint {
        &self.endpoint
    }

    /// Send a command and return the decoded reply without judging STATUS
    pub async fn execute(&self, command: &Command) -> Result<RawResponse, ProtocolError> {
        let request = command.to_request()?;
        let transport = TcpTransport::new(
            self.endpoint.socket_addr(),
            self.config.connect_timeout,
            self.config.idle_timeout,
        );
        let bytes = transport.exchange(&request).await?;
        let response = decode_response(&bytes, command.repairs_concatenation());

        debug!(
            host = %self.endpoint,
            command = %command,
            structured = response.is_structured(),
            "API command completed"
        );

        Ok(response)
    }

    /// Send a command and require an I/S status
    pub async fn send(&self, command: &Command) -> Result<Value, ProtocolError> {
        check_status(self.execute(command).await?)
    }

    /// Send a `name|parameter` shorthand command
    pub async fn send_raw(&self, shorthand: &str) -> Result<Value, ProtocolError> {
        let command = Command::parse(shorthand)?;
        self.send(&command).await
    }

    pub async fn version(&self) -> Result<VersionInfo, ProtocolError> {
        let value = self.send(&Command::version()).await?;
        Ok(extract_version(&value))
    }

    /// `stats` reply. Firmware that still sends undecodable text gets it
    /// passed through for the normalizer's text fallback.
    pub async fn stats(&self) -> Result<RawResponse, ProtocolError> {
        match self.execute(&Command::stats()).await? {
            RawResponse::Text(text) => {
                debug!(host = %self.endpoint, len = text.len(), "stats reply is not JSON");
                Ok(RawResponse::Text(text))
            }
            structured => check_status(structured).map(RawResponse::Structured),
        }
    }

    pub async fn summary(&self) -> Result<Value, ProtocolError> {
        self.send(&Command::summary()).await
    }

    pub async fn pools(&self) -> Result<Vec<PoolInfo>, ProtocolError> {
        let value = self.send(&Command::pools()).await?;
        Ok(extract_pools(&value))
    }

    pub async fn devs(&self) -> Result<Value, ProtocolError> {
        self.send(&Command::devs()).await
    }

    pub async fn add_pool(&self, url: &str, user: &str, password: &str) -> Result<Value, ProtocolError> {
        self.send(&Command::add_pool(url, user, password)).await
    }

    pub async fn remove_pool(&self, index: u32) -> Result<Value, ProtocolError> {
        self.send(&Command::remove_pool(index)).await
    }

    pub async fn switch_pool(&self, index: u32) -> Result<Value, ProtocolError> {
        self.send(&Command::switch_pool(index)).await
    }

    pub async fn enable_pool(&self, index: u32) -> Result<Value, ProtocolError> {
        self.send(&Command::enable_pool(index)).await
    }

    pub async fn disable_pool(&self, index: u32) -> Result<Value, ProtocolError> {
        self.send(&Command::disable_pool(index)).await
    }

    pub async fn restart(&self) -> Result<Value, ProtocolError> {
        self.send(&Command::restart()).await
    }

    pub async fn reset(&self) -> Result<Value, ProtocolError> {
        self.send(&Command::reset()).await
    }

    /// Drop the first pool and add a new one in its place
    pub async fn replace_pool(&self, url: &str, user: &str, password: &str) -> Result<Value, ProtocolError> {
        self.remove_pool(0).await?;
        self.add_pool(url, user, password).await
    }

    /// Query version, stats and pools and assemble the telemetry record.
    ///
    /// Version and stats failures fail the whole query. A pools failure
    /// only costs the pool fields.
    pub async fn record(&self) -> Result<NormalizedRecord, ProtocolError> {
        let version = self.version().await?;
        let stats = self.stats().await?;
        let pools = match self.pools().await {
            Ok(pools) => pools,
            Err(e) => {
                warn!(host = %self.endpoint, error = %e, "pools query failed, continuing without pools");
                Vec::new()
            }
        };
        Ok(build_record(&self.endpoint, version, &stats, pools))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve each connection one request, answering through `respond`.
    /// Requests are recorded in arrival order.
    async fn fake_miner<F>(respond: F) -> (SocketAddr, Arc<Mutex<Vec<Value>>>)
    where
        F: Fn(&Value) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                let request = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "client closed before a full request");
                    buf.extend_from_slice(&chunk[..n]);
                    if let Ok(value) = serde_json::from_slice::<Value>(&buf) {
                        break value;
                    }
                };
                let reply = respond(&request);
                log.lock().unwrap().push(request);
                socket.write_all(&reply).await.unwrap();
            }
        });

        (addr, seen)
    }

    fn client_for(addr: SocketAddr) -> MinerClient {
        MinerClient::with_config(
            MinerEndpoint::from(addr),
            ClientConfig {
                connect_timeout: Duration::from_secs(1),
                idle_timeout: Duration::from_millis(500),
            },
        )
    }

    fn ok_reply(extra: Value) -> Vec<u8> {
        let mut body = json!({"STATUS": [{"STATUS": "S", "Code": 1, "Msg": "ok"}], "id": 1});
        if let (Some(target), Some(fields)) = (body.as_object_mut(), extra.as_object()) {
            target.extend(fields.clone());
        }
        serde_json::to_vec(&body).unwrap()
    }

    #[tokio::test]
    async fn test_stats_request_has_no_parameter() {
        let (addr, seen) = fake_miner(|_| ok_reply(json!({"STATS": []}))).await;

        client_for(addr).stats().await.unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], json!({"command": "stats"}));
    }

    #[tokio::test]
    async fn test_addpool_parameter_is_comma_joined() {
        let (addr, seen) = fake_miner(|_| ok_reply(json!({}))).await;

        client_for(addr).add_pool("url", "user", "pass").await.unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests[0], json!({"command": "addpool", "parameter": "url,user,pass"}));
    }

    #[tokio::test]
    async fn test_replace_pool_removes_then_adds() {
        let (addr, seen) = fake_miner(|_| ok_reply(json!({}))).await;

        client_for(addr)
            .replace_pool("stratum+tcp://p:3333", "acct.w1", "x")
            .await
            .unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests[0], json!({"command": "removepool", "parameter": "0"}));
        assert_eq!(
            requests[1],
            json!({"command": "addpool", "parameter": "stratum+tcp://p:3333,acct.w1,x"})
        );
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let (addr, _) = fake_miner(|_| {
            serde_json::to_vec(&json!({"STATUS": [{"STATUS": "E", "Code": 14, "Msg": "Invalid command"}]}))
                .unwrap()
        })
        .await;

        let err = client_for(addr).send_raw("bogus").await.unwrap_err();
        match err {
            ProtocolError::Rejected(failure) => {
                assert_eq!(failure.code, 14);
                assert_eq!(failure.message, "Invalid command");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nul_padded_reply_decodes() {
        let (addr, _) = fake_miner(|_| {
            let mut body = ok_reply(json!({"VERSION": [{"Type": "Antminer S19", "API": "3.1", "CGMiner": "4.11.1"}]}));
            body.extend_from_slice(&[0, 0, 0, 0]);
            body
        })
        .await;

        let version = client_for(addr).version().await.unwrap();
        assert_eq!(version.model.as_deref(), Some("Antminer S19"));
    }

    #[tokio::test]
    async fn test_stats_repairs_concatenated_objects() {
        let body = br#"{"STATUS":[{"STATUS":"S"}],"STATS":[{"Type":"Antminer S9"}{"GHS 5s":"13500.1"}],"id":1}"#;
        let (addr, _) = fake_miner(move |_| body.to_vec()).await;
        let client = client_for(addr);

        let stats = client.stats().await.unwrap();
        assert_eq!(stats.as_structured().unwrap()["STATS"].as_array().unwrap().len(), 2);

        // Other commands get no repair and surface the body as unknown text
        let err = client.summary().await.unwrap_err();
        match err {
            ProtocolError::Unknown(raw) => assert!(!raw.is_structured()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_connection_returns_partial_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut chunk = [0u8; 256];
            let _ = socket.read(&mut chunk).await.unwrap();
            socket.write_all(&ok_reply(json!({}))).await.unwrap();
            // Never close; the client has to give up on its own
            tokio::time::sleep(Duration::from_secs(3)).await;
        });

        let client = MinerClient::with_config(
            MinerEndpoint::from(addr),
            ClientConfig {
                connect_timeout: Duration::from_secs(1),
                idle_timeout: Duration::from_millis(200),
            },
        );
        let value = client.summary().await.unwrap();
        assert_eq!(value["id"], 1);
        server.abort();
    }

    #[tokio::test]
    async fn test_empty_reply_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut chunk = [0u8; 256];
            let _ = socket.read(&mut chunk).await;
        });

        let err = client_for(addr).summary().await.unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyResponse(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client_for(addr).summary().await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_record_survives_pools_failure() {
        let (addr, _) = fake_miner(|request| match request["command"].as_str() {
            Some("version") => ok_reply(json!({"VERSION": [{"Type": "Antminer S9", "API": "3.1", "BMMiner": "2.0.0"}]})),
            Some("stats") => ok_reply(json!({"STATS": [
                {"BMMiner": "2.0.0", "Type": "Antminer S9"},
                {"GHS 5s": "13500.5", "GHS av": "13480.2", "temp_max": 72, "fan_num": 2, "fan1": 5760, "fan2": 5880}
            ]})),
            _ => serde_json::to_vec(&json!({"STATUS": [{"STATUS": "E", "Msg": "no pools"}]})).unwrap(),
        })
        .await;

        let record = client_for(addr).record().await.unwrap();
        assert!(record.online);
        assert_eq!(record.model.as_deref(), Some("Antminer S9"));
        assert_eq!(record.hashrate_5s, Some(13500.5));
        assert_eq!(record.temperature, Some(72.0));
        assert_eq!(record.fans, vec![5760, 5880]);
        assert!(record.pools.is_empty());
        assert_eq!(record.pool, None);
    }

    #[tokio::test]
    async fn test_record_fails_when_version_fails() {
        let (addr, _) = fake_miner(|_| {
            serde_json::to_vec(&json!({"STATUS": [{"STATUS": "F", "Msg": "down"}]})).unwrap()
        })
        .await;

        let err = client_for(addr).record().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
