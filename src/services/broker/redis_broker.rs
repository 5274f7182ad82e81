use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, AsyncConnectionConfig};

use super::{Broker, BrokerError};

/// Connect and per-command response bound used when none is configured.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed broker. Lists carry both the job queue and per-job results.
pub struct RedisBroker {
    client: redis::Client,
    io_timeout: Duration,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| BrokerError::Config(e.to_string()))?;
        Ok(Self {
            client,
            io_timeout: DEFAULT_IO_TIMEOUT,
        })
    }

    /// Bound on connecting and on waiting for each reply. A blackholed
    /// server then surfaces as `BrokerError::Unavailable` instead of a hang.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    // Each call gets its own connection so a blocking pop never stalls
    // commands issued by other tasks.
    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        self.connect(Some(self.io_timeout)).await
    }

    async fn connect(
        &self,
        response_timeout: Option<Duration>,
    ) -> Result<MultiplexedConnection, BrokerError> {
        let mut config = AsyncConnectionConfig::new().set_connection_timeout(self.io_timeout);
        if let Some(response_timeout) = response_timeout {
            config = config.set_response_timeout(response_timeout);
        }
        Ok(self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?)
    }
}

/// The reply to a blocking pop arrives only after the server-side wait, so
/// the response bound sits on top of it. Waiting forever has no bound.
fn blocking_response_timeout(
    timeout: Option<Duration>,
    io_timeout: Duration,
) -> Option<Duration> {
    timeout.and_then(|t| t.checked_add(io_timeout))
}

/// PEXPIRE argument for a TTL, saturating instead of wrapping.
fn expiry_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// BRPOP/BLPOP take fractional seconds; 0 means wait forever, so clamp
/// non-zero timeouts to the server's millisecond resolution.
fn blocking_timeout_secs(timeout: Option<Duration>) -> f64 {
    match timeout {
        None => 0.0,
        Some(t) => t.max(Duration::from_millis(1)).as_secs_f64(),
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, key: &str, value: String) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("RPOP").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn pop_blocking(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, BrokerError> {
        let mut conn = self
            .connect(blocking_response_timeout(timeout, self.io_timeout))
            .await?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(blocking_timeout_secs(timeout))
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn replace(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore().lpush(key, value).ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(expiry_millis(ttl)).ignore();
        }
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<u64, BrokerError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(key).await?;
        Ok(depth)
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
