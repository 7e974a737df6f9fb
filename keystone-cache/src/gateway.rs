//! Cache connection gateway.
//!
//! A gateway wraps the remote cache backend and reports whether it is
//! reachable. Connections are opened lazily on first demand. Components built
//! on top ([`TagCache`](crate::TagCache), [`MessageBus`](crate::MessageBus),
//! [`DocumentCache`](crate::DocumentCache)) call [`CacheGateway::connect`]
//! before every backend call and treat `false` as "no cached data".

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use keystone_redis::{Message, RedisService, Subscription};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::debug;

/// Lazy-connecting access to the remote cache backend.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    /// Open the connection if needed and report whether the backend is usable.
    async fn connect(&self) -> bool;

    /// Connection state observed by the last attempt.
    fn is_connected(&self) -> bool;

    /// Read a string value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write a string value, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Write a string value unless a live one already exists. Returns whether
    /// the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> CacheResult<bool>;

    /// Delete keys of any kind (values or sets).
    async fn delete(&self, keys: &[String]) -> CacheResult<()>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> CacheResult<()>;

    /// Current members of a set; empty when the set does not exist.
    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Publish a message on a channel.
    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> CacheResult<Subscription>;
}

#[async_trait]
impl CacheGateway for RedisService {
    async fn connect(&self) -> bool {
        RedisService::connect(self).await
    }

    fn is_connected(&self) -> bool {
        RedisService::is_connected(self)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(RedisService::get(self, key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        Ok(RedisService::set(self, key, value, ttl).await?)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        Ok(RedisService::set_nx(self, key, value, ttl).await?)
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        RedisService::delete(self, keys).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<()> {
        RedisService::sadd(self, key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        Ok(RedisService::smembers(self, key).await?)
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()> {
        RedisService::publish(self, channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<Subscription> {
        Ok(RedisService::subscribe(self, channel).await?)
    }
}

/// Shared in-process stand-in for a Redis server.
///
/// Several [`InMemoryGateway`] handles over the same backend behave like
/// nodes of one deployment talking to the same Redis instance.
pub struct InMemoryBackend {
    values: DashMap<String, StoredValue>,
    sets: DashMap<String, HashSet<String>>,
    channels: DashMap<String, broadcast::Sender<Message>>,
    available: AtomicBool,
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl InMemoryBackend {
    /// Create a reachable backend.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            values: DashMap::new(),
            sets: DashMap::new(),
            channels: DashMap::new(),
            available: AtomicBool::new(true),
        })
    }

    /// Simulate the backend going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
        if !available {
            // A restarted server has lost every subscriber.
            self.channels.clear();
        }
    }

    /// Whether the backend currently accepts commands.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Raw read bypassing gateways, for assertions.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key) || self.sets.contains_key(key)
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Message> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

/// One node's connection to an [`InMemoryBackend`].
pub struct InMemoryGateway {
    backend: Arc<InMemoryBackend>,
    connected: AtomicBool,
}

impl InMemoryGateway {
    /// Create a gateway. It stays disconnected until first used.
    pub fn new(backend: Arc<InMemoryBackend>) -> Self {
        Self {
            backend,
            connected: AtomicBool::new(false),
        }
    }

    /// Backend shared by this gateway.
    pub fn backend(&self) -> &Arc<InMemoryBackend> {
        &self.backend
    }

    fn ensure_available(&self) -> CacheResult<()> {
        let available = self.backend.is_available();
        self.connected.store(available, Ordering::Release);
        if available {
            Ok(())
        } else {
            Err(CacheError::Unavailable("in-memory backend is offline".to_string()))
        }
    }
}

#[async_trait]
impl CacheGateway for InMemoryGateway {
    async fn connect(&self) -> bool {
        self.ensure_available().is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_available()?;
        let now = Instant::now();
        let expired = match self.backend.values.get(key) {
            Some(stored) if stored.is_live(now) => {
                return Ok(Some(stored.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.backend.values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.ensure_available()?;
        self.backend
            .values
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        self.ensure_available()?;
        match self.backend.values.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live(Instant::now()) {
                    return Ok(false);
                }
                entry.insert(StoredValue::new(value, ttl));
            }
            Entry::Vacant(entry) => {
                entry.insert(StoredValue::new(value, ttl));
            }
        }
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        self.ensure_available()?;
        for key in keys {
            self.backend.values.remove(key);
            self.backend.sets.remove(key);
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<()> {
        self.ensure_available()?;
        self.backend
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.ensure_available()?;
        Ok(self
            .backend
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()> {
        self.ensure_available()?;
        let receivers = self
            .backend
            .channel(channel)
            .send(Message::new(channel, message))
            .unwrap_or(0);
        debug!(channel = %channel, receivers = receivers, "Published message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<Subscription> {
        self.ensure_available()?;
        let mut source = self.backend.channel(channel).subscribe();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, channel))
    }
}
