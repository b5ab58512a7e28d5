use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AlarmItem, RealtimeView};

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CacheError::Timeout
        } else {
            CacheError::Redis(Arc::new(err))
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Parse(err.to_string())
    }
}

impl From<&CacheError> for crate::error::ErrorKind {
    fn from(err: &CacheError) -> Self {
        use crate::error::ErrorKind;
        match err {
            CacheError::NotFound => ErrorKind::NotFound,
            CacheError::Parse(_) | CacheError::InvalidConfiguration(_) => ErrorKind::Validation,
            CacheError::Timeout | CacheError::Redis(_) => ErrorKind::TransientIo,
        }
    }
}

/// Minimal key/value surface the pipeline needs from Redis.
#[async_trait]
pub trait Client: Send + Sync {
    /// Returns `CacheError::NotFound` for missing or empty keys.
    async fn get(&self, key: String) -> Result<String, CacheError>;
    async fn set_ex(&self, key: String, value: String, ttl_seconds: u64)
        -> Result<(), CacheError>;
}

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// `None` means no timeout. Zero durations are rejected.
    pub async fn with_timeouts(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CacheError> {
        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            if timeout.is_zero() {
                return Err(CacheError::InvalidConfiguration(
                    "response timeout cannot be zero, use None for no timeout".to_string(),
                ));
            }
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            if timeout.is_zero() {
                return Err(CacheError::InvalidConfiguration(
                    "connection timeout cannot be zero, use None for no timeout".to_string(),
                ));
            }
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }

    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, key: String) -> Result<String, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        match value {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(CacheError::NotFound),
        }
    }

    async fn set_ex(
        &self,
        key: String,
        value: String,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCacheCall {
    pub op: String,
    pub key: String,
    pub value: Option<String>,
    pub ttl_seconds: Option<u64>,
}

/// Stateful mock: `set_ex` stores values so later `get`s see them, unless an error was
/// registered for the key.
#[derive(Clone, Default)]
pub struct MockCacheClient {
    values: Arc<Mutex<HashMap<String, String>>>,
    get_errors: Arc<Mutex<HashMap<String, CacheError>>>,
    set_errors: Arc<Mutex<HashMap<String, CacheError>>>,
    calls: Arc<Mutex<Vec<MockCacheCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockCacheClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &str) -> Self {
        lock(&self.values).insert(key.to_owned(), value.to_owned());
        self.clone()
    }

    pub fn get_err(&self, key: &str, err: CacheError) -> Self {
        lock(&self.get_errors).insert(key.to_owned(), err);
        self.clone()
    }

    pub fn set_err(&self, key: &str, err: CacheError) -> Self {
        lock(&self.set_errors).insert(key.to_owned(), err);
        self.clone()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    pub fn get_calls(&self) -> Vec<MockCacheCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Client for MockCacheClient {
    async fn get(&self, key: String) -> Result<String, CacheError> {
        lock(&self.calls).push(MockCacheCall {
            op: "get".to_string(),
            key: key.clone(),
            value: None,
            ttl_seconds: None,
        });

        if let Some(err) = lock(&self.get_errors).get(&key) {
            return Err(err.clone());
        }
        lock(&self.values)
            .get(&key)
            .cloned()
            .ok_or(CacheError::NotFound)
    }

    async fn set_ex(
        &self,
        key: String,
        value: String,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        lock(&self.calls).push(MockCacheCall {
            op: "set_ex".to_string(),
            key: key.clone(),
            value: Some(value.clone()),
            ttl_seconds: Some(ttl_seconds),
        });

        if let Some(err) = lock(&self.set_errors).get(&key) {
            return Err(err.clone());
        }
        lock(&self.values).insert(key, value);
        Ok(())
    }
}

pub fn realtime_key(card_id: Uuid) -> String {
    format!("card:{card_id}:realtime")
}

pub fn alarms_key(card_id: Uuid) -> String {
    format!("card:{card_id}:alarms")
}

pub fn view_key(card_id: Uuid) -> String {
    format!("card:{card_id}:view")
}

/// Typed access to the per-card cache entries.
#[derive(Clone)]
pub struct CardCache {
    client: Arc<dyn Client>,
    realtime_ttl_seconds: u64,
    view_ttl_seconds: u64,
}

impl CardCache {
    pub fn new(client: Arc<dyn Client>, realtime_ttl: Duration, view_ttl: Duration) -> Self {
        Self {
            client,
            realtime_ttl_seconds: realtime_ttl.as_secs().max(1),
            view_ttl_seconds: view_ttl.as_secs().max(1),
        }
    }

    pub async fn put_realtime(&self, card_id: Uuid, view: &RealtimeView) -> Result<(), CacheError> {
        self.put_json(realtime_key(card_id), view, self.realtime_ttl_seconds)
            .await
    }

    pub async fn get_realtime(&self, card_id: Uuid) -> Result<RealtimeView, CacheError> {
        self.get_json(realtime_key(card_id)).await
    }

    pub async fn get_alarms(&self, card_id: Uuid) -> Result<Vec<AlarmItem>, CacheError> {
        self.get_json(alarms_key(card_id)).await
    }

    pub async fn put_view<T: Serialize + Sync>(
        &self,
        card_id: Uuid,
        view: &T,
    ) -> Result<(), CacheError> {
        self.put_json(view_key(card_id), view, self.view_ttl_seconds)
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: String) -> Result<T, CacheError> {
        let raw = self.client.get(key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn put_json<T: Serialize + ?Sized + Sync>(
        &self,
        key: String,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        self.client.set_ex(key, payload, ttl_seconds).await
    }
}
