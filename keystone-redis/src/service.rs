//! Lazily connected Redis service.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{PubSub, RedisConfig, RedisError, Result, Subscription};

/// Redis service that opens its connection on first demand.
///
/// Construction never touches the network. The first command (or an explicit
/// [`RedisService::connect`]) establishes a [`ConnectionManager`], which then
/// reconnects on its own. A failed attempt leaves the service disconnected and
/// the next demand retries.
pub struct RedisService {
    config: Option<RedisConfig>,
    client: Option<Client>,
    connection: Mutex<Option<ConnectionManager>>,
    connected: AtomicBool,
}

impl RedisService {
    /// Create a service from a validated configuration.
    pub fn new(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.connection_url())
            .map_err(|e| RedisError::Config(e.to_string()))?;

        Ok(Self {
            config: Some(config),
            client: Some(client),
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
        })
    }

    /// Create a service that never connects.
    pub fn disabled() -> Self {
        Self {
            config: None,
            client: None,
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Build a service from a connection string.
    ///
    /// An invalid connection string is logged and yields a disabled service, so
    /// the host keeps starting without a distributed cache.
    pub fn from_connection_string(connection_string: &str) -> Self {
        match RedisConfig::parse(connection_string).and_then(Self::new) {
            Ok(service) => service,
            Err(e) => {
                error!(error = %e, "Invalid Redis configuration, distributed cache disabled");
                Self::disabled()
            }
        }
    }

    /// Build a service from `REDIS_*` environment variables.
    pub fn from_env() -> Self {
        match RedisConfig::from_env() {
            Ok(Some(config)) => match Self::new(config) {
                Ok(service) => service,
                Err(e) => {
                    error!(error = %e, "Invalid Redis configuration, distributed cache disabled");
                    Self::disabled()
                }
            },
            Ok(None) => {
                info!("REDIS_URL not set, distributed cache disabled");
                Self::disabled()
            }
            Err(e) => {
                error!(error = %e, "Invalid Redis configuration, distributed cache disabled");
                Self::disabled()
            }
        }
    }

    /// Get the configuration, if any.
    pub fn config(&self) -> Option<&RedisConfig> {
        self.config.as_ref()
    }

    /// Whether a configuration was supplied at all.
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Whether the last connection attempt succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Apply the configured key prefix.
    pub fn prefixed(&self, key: &str) -> String {
        match &self.config {
            Some(config) => config.prefixed(key),
            None => key.to_string(),
        }
    }

    /// Establish the connection if it is not open yet.
    ///
    /// Returns the connection state after the attempt.
    pub async fn connect(&self) -> bool {
        self.connection().await.is_ok()
    }

    /// Get a handle on the shared connection, connecting on first use.
    pub async fn connection(&self) -> Result<ConnectionManager> {
        let Some(client) = &self.client else {
            return Err(RedisError::Disabled("no Redis configuration".to_string()));
        };

        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let timeout = self
            .config
            .as_ref()
            .map(|c| c.connection_timeout)
            .unwrap_or(Duration::from_secs(5));

        let attempt = tokio::time::timeout(timeout, ConnectionManager::new(client.clone())).await;
        match attempt {
            Ok(Ok(conn)) => {
                info!("Connected to Redis");
                *slot = Some(conn.clone());
                self.connected.store(true, Ordering::Release);
                Ok(conn)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Unable to connect to Redis");
                self.connected.store(false, Ordering::Release);
                Err(RedisError::Connection(e.to_string()))
            }
            Err(_) => {
                warn!(timeout = ?timeout, "Timed out connecting to Redis");
                self.connected.store(false, Ordering::Release);
                Err(RedisError::Connection("connection timed out".to_string()))
            }
        }
    }

    /// Create a Pub/Sub client.
    pub fn pubsub(&self) -> Result<PubSub> {
        self.client
            .clone()
            .map(PubSub::new)
            .ok_or_else(|| RedisError::Disabled("no Redis configuration".to_string()))
    }

    /// Get a value.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.prefixed(key)).await?;
        Ok(value)
    }

    /// Set a value, with expiration when `ttl` is given.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.prefixed(key);
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    /// Set a string value only if the key does not exist (`SET NX`).
    ///
    /// Returns whether the value was written.
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.prefixed(key)).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    /// Delete keys, returning how many existed.
    pub async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let keys: Vec<String> = keys.iter().map(|k| self.prefixed(k)).collect();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }

    /// Set add.
    pub async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let added: u64 = conn.sadd(self.prefixed(key), member).await?;
        Ok(added > 0)
    }

    /// Set members.
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(self.prefixed(key)).await?;
        Ok(members)
    }

    /// Publish a message, returning the number of receivers.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut conn = self.connection().await?;
        let channel = self.prefixed(channel);
        let receivers: u32 = conn.publish(&channel, message).await?;
        debug!(channel = %channel, receivers = receivers, "Published message");
        Ok(receivers)
    }

    /// Subscribe to a channel on a dedicated pub/sub connection.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        // Confirms the backend is reachable before opening the pub/sub socket.
        self.connection().await?;
        self.pubsub()?.subscribe(&self.prefixed(channel)).await
    }
}
