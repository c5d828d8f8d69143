/// Last-refresh bookkeeping.
///
/// The time of the last successful refresh is owned by an injected
/// `RefreshLog`: created at start-up, written after each refresh, read by the
/// status endpoint. The in-memory log is per process; the store-backed log is
/// shared by every process pointing at the same database.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

use crate::store::Store;

const LAST_REFRESH_KEY: &str = "last_refresh";

pub trait RefreshLog: Send + Sync {
    fn record(&self, at: DateTime<Utc>) -> Result<()>;
    fn last(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Process-local log. Not shared across instances.
#[derive(Default)]
pub struct MemoryRefreshLog {
    last: RwLock<Option<DateTime<Utc>>>,
}

impl MemoryRefreshLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefreshLog for MemoryRefreshLog {
    fn record(&self, at: DateTime<Utc>) -> Result<()> {
        let mut last = self
            .last
            .write()
            .map_err(|_| anyhow!("Refresh log lock poisoned"))?;
        *last = Some(at);
        Ok(())
    }

    fn last(&self) -> Result<Option<DateTime<Utc>>> {
        let last = self
            .last
            .read()
            .map_err(|_| anyhow!("Refresh log lock poisoned"))?;
        Ok(*last)
    }
}

/// Log persisted in the `service_state` table.
pub struct StoreRefreshLog {
    store: Arc<Store>,
}

impl StoreRefreshLog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl RefreshLog for StoreRefreshLog {
    fn record(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set_state(LAST_REFRESH_KEY, &at.to_rfc3339())
    }

    fn last(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.store.get_state(LAST_REFRESH_KEY)? else {
            return Ok(None);
        };
        let ts = DateTime::parse_from_rfc3339(&value)
            .with_context(|| format!("Invalid stored refresh time: {}", value))?;
        Ok(Some(ts.with_timezone(&Utc)))
    }
}
