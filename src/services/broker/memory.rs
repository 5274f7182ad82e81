use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Broker, BrokerError};

#[derive(Debug, Default)]
struct Entry {
    items: VecDeque<String>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process broker with the same semantics as [`super::RedisBroker`].
///
/// All list state sits behind one mutex, so a pop hands each element to
/// exactly one caller. Blocked poppers park on a [`Notify`] and re-check
/// after every push.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    lists: Mutex<HashMap<String, Entry>>,
    pushed: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lists(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave a list half-updated.
        self.lists.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_pop(&self, key: &str) -> Option<String> {
        let mut lists = self.lists();
        let now = Instant::now();
        let entry = lists.get_mut(key)?;
        if entry.is_expired(now) {
            lists.remove(key);
            return None;
        }
        let value = entry.items.pop_back();
        if entry.items.is_empty() {
            lists.remove(key);
        }
        value
    }

    /// Drop every expired key. Returns how many were reclaimed.
    pub fn purge_expired(&self) -> usize {
        let mut lists = self.lists();
        let now = Instant::now();
        let before = lists.len();
        lists.retain(|_, entry| !entry.is_expired(now));
        before - lists.len()
    }

    /// Number of live keys, counting only unexpired entries.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.lists()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, key: &str, value: String) -> Result<(), BrokerError> {
        {
            let mut lists = self.lists();
            let now = Instant::now();
            let entry = lists.entry(key.to_string()).or_default();
            if entry.is_expired(now) {
                *entry = Entry::default();
            }
            entry.items.push_front(value);
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.try_pop(key))
    }

    async fn pop_blocking(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, BrokerError> {
        // A timeout past the clock's range is the same as no timeout.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            // Register interest before checking so a push between the
            // check and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key) {
                return Ok(Some(value));
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            return Ok(self.try_pop(key));
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn replace(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), BrokerError> {
        {
            let mut lists = self.lists();
            lists.insert(
                key.to_string(),
                Entry {
                    items: VecDeque::from([value]),
                    expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
                },
            );
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<u64, BrokerError> {
        let now = Instant::now();
        Ok(self
            .lists()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map_or(0, |entry| entry.items.len() as u64))
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
