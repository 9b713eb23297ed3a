pub mod influx;
pub mod memory;
pub mod store;

pub use influx::InfluxStore;
pub use memory::{MemoryStore, StoredSeries};
pub use store::{SeriesStore, SeriesWrite};

use log::{info, warn};
use std::time::Duration;

use crate::error::StoreError;

/// Ping the store until it answers, at most `attempts` times.
///
/// Returns the last error when the store never comes up.
pub async fn wait_for_store(
    store: &dyn SeriesStore,
    attempts: u32,
    interval: Duration,
) -> Result<(), StoreError> {
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match store.ping().await {
            Ok(()) => {
                info!(
                    "store is up, endpoint: {}, attempt: {}",
                    store.endpoint(),
                    attempt
                );
                return Ok(());
            }
            Err(err) => {
                warn!(
                    "store not ready, endpoint: {}, attempt: {}/{}, error: {}",
                    store.endpoint(),
                    attempt,
                    attempts,
                    err
                );
                last_err = Some(err);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(last_err.unwrap_or_else(|| StoreError::Unavailable {
        endpoint: store.endpoint(),
        reason: "no attempt made".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_store() {
        let store = MemoryStore::new();
        assert!(wait_for_store(&store, 3, Duration::from_millis(1)).await.is_ok());

        store.set_unavailable(true);
        let res = wait_for_store(&store, 2, Duration::from_millis(1)).await;
        assert!(matches!(res, Err(StoreError::Unavailable { .. })));
    }
}
