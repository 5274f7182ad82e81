//! Backing store for the job queue and result store.
//!
//! Components receive an `Arc<dyn Broker>` rather than reaching for a global
//! connection, so tests run against [`MemoryBroker`] while deployments use
//! [`RedisBroker`]. Every operation touches a single key and is atomic on
//! its own; nothing here spans two keys.

use std::time::Duration;

use async_trait::async_trait;

mod memory;
mod redis_broker;

pub use self::memory::MemoryBroker;
pub use self::redis_broker::RedisBroker;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append `value` at the head of the list stored at `key`.
    async fn push(&self, key: &str, value: String) -> Result<(), BrokerError>;

    /// Remove and return the tail of the list, if any.
    async fn pop(&self, key: &str) -> Result<Option<String>, BrokerError>;

    /// Remove and return the tail of the list, waiting up to `timeout` for
    /// one to arrive. `None` waits indefinitely.
    async fn pop_blocking(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, BrokerError>;

    /// Atomically replace whatever `key` held with a single-element list and
    /// set its expiry.
    async fn replace(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), BrokerError>;

    /// Length of the list at `key` (0 if absent).
    async fn len(&self, key: &str) -> Result<u64, BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Connection or command failure; the operation may succeed if retried.
    #[error("Backing store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("Invalid broker configuration: {0}")]
    Config(String),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}
