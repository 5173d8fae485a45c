use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::position::PositionSample;
use crate::store::cache::KeyValueCache;

/// Cache key namespaces for live tracking data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKey {
    Courier(Uuid),
    Order(Uuid),
    CourierHistory(Uuid),
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionKey::Courier(id) => write!(f, "delivery_location:{id}"),
            PositionKey::Order(id) => write!(f, "order_delivery_location:{id}"),
            PositionKey::CourierHistory(id) => write!(f, "delivery_location_history:{id}"),
        }
    }
}

/// Last-known positions with expiry. Advisory only: nothing here is used for
/// status or assignment decisions.
///
/// Writes are last-writer-wins by arrival. Callers that care about ordering
/// compare `captured_at` themselves.
pub struct EphemeralPositionStore {
    cache: Arc<dyn KeyValueCache>,
    live_ttl_secs: u64,
    history_ttl_secs: u64,
    history_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl EphemeralPositionStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, live_ttl_secs: u64, history_ttl_secs: u64) -> Self {
        Self {
            cache,
            live_ttl_secs,
            history_ttl_secs,
            history_locks: DashMap::new(),
        }
    }

    pub async fn write(
        &self,
        key: PositionKey,
        sample: &PositionSample,
        ttl_seconds: u64,
    ) -> Result<(), AppError> {
        let value = serde_json::to_string(sample)
            .map_err(|err| AppError::Internal(format!("failed to encode position: {err}")))?;
        self.cache
            .set_ex(&key.to_string(), value, Duration::from_secs(ttl_seconds))
            .await
    }

    /// `Ok(None)` means no live data: never written or expired.
    pub async fn read(&self, key: PositionKey) -> Result<Option<PositionSample>, AppError> {
        let Some(raw) = self.cache.get(&key.to_string()).await? else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| AppError::Internal(format!("corrupt position entry {key}: {err}")))
    }

    /// Stores the sample as the courier's current position.
    pub async fn record_courier(&self, sample: &PositionSample) -> Result<(), AppError> {
        self.write(
            PositionKey::Courier(sample.subject_id),
            sample,
            self.live_ttl_secs,
        )
        .await
    }

    /// Stores the sample as the last broadcast position for `order_id`, so a
    /// newly joined observer has something to show before the next update.
    pub async fn record_order(
        &self,
        order_id: Uuid,
        sample: &PositionSample,
    ) -> Result<(), AppError> {
        self.write(PositionKey::Order(order_id), sample, self.live_ttl_secs)
            .await
    }

    /// Records a batch from one courier. The newest sample (by capture time,
    /// later entries winning ties) becomes the current position; every sample
    /// goes into the rolling history window.
    pub async fn record_batch(
        &self,
        samples: &[PositionSample],
    ) -> Result<PositionSample, AppError> {
        let Some(first) = samples.first() else {
            return Err(AppError::BadRequest("batch is empty".to_string()));
        };
        let subject_id = first.subject_id;
        if samples.iter().any(|sample| sample.subject_id != subject_id) {
            return Err(AppError::BadRequest(
                "batch mixes samples from several couriers".to_string(),
            ));
        }

        let latest = samples
            .iter()
            .reduce(|best, sample| {
                if sample.captured_at >= best.captured_at {
                    sample
                } else {
                    best
                }
            })
            .cloned()
            .ok_or_else(|| AppError::BadRequest("batch is empty".to_string()))?;

        self.record_courier(&latest).await?;
        self.append_history(subject_id, samples).await?;

        Ok(latest)
    }

    pub async fn history(&self, courier_id: Uuid) -> Result<Vec<PositionSample>, AppError> {
        let key = PositionKey::CourierHistory(courier_id);
        let Some(raw) = self.cache.get(&key.to_string()).await? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&raw)
            .map_err(|err| AppError::Internal(format!("corrupt position history {key}: {err}")))
    }

    pub async fn courier_position(
        &self,
        courier_id: Uuid,
    ) -> Result<Option<PositionSample>, AppError> {
        self.read(PositionKey::Courier(courier_id)).await
    }

    pub async fn order_position(&self, order_id: Uuid) -> Result<Option<PositionSample>, AppError> {
        self.read(PositionKey::Order(order_id)).await
    }

    async fn append_history(
        &self,
        courier_id: Uuid,
        samples: &[PositionSample],
    ) -> Result<(), AppError> {
        // One read-modify-write of a courier's window at a time.
        let lock = self
            .history_locks
            .entry(courier_id)
            .or_default()
            .value()
            .clone();
        let _held = lock.lock().await;

        let mut window = self.history(courier_id).await?;
        window.extend_from_slice(samples);

        let cutoff = Utc::now() - chrono::Duration::seconds(self.history_ttl_secs as i64);
        window.retain(|sample| sample.captured_at >= cutoff);
        window.sort_by_key(|sample| sample.captured_at);

        debug!(courier_id = %courier_id, samples = window.len(), "position history updated");

        let key = PositionKey::CourierHistory(courier_id);
        let value = serde_json::to_string(&window)
            .map_err(|err| AppError::Internal(format!("failed to encode history: {err}")))?;
        self.cache
            .set_ex(
                &key.to_string(),
                value,
                Duration::from_secs(self.history_ttl_secs),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    use super::{EphemeralPositionStore, PositionKey};
    use crate::models::position::{GeoPoint, PositionSample};
    use crate::store::cache::MemoryCache;

    fn store() -> EphemeralPositionStore {
        EphemeralPositionStore::new(Arc::new(MemoryCache::new()), 300, 3600)
    }

    fn sample(courier: Uuid, order: Option<Uuid>, lng: f64, age_secs: i64) -> PositionSample {
        PositionSample {
            subject_id: courier,
            order_id: order,
            coordinates: GeoPoint { lng, lat: 12.97 },
            accuracy: Some(5.0),
            speed: None,
            heading: None,
            captured_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[test]
    fn keys_use_operational_layout() {
        let id = Uuid::from_u128(7);
        assert_eq!(
            PositionKey::Courier(id).to_string(),
            format!("delivery_location:{id}")
        );
        assert_eq!(
            PositionKey::Order(id).to_string(),
            format!("order_delivery_location:{id}")
        );
        assert_eq!(
            PositionKey::CourierHistory(id).to_string(),
            format!("delivery_location_history:{id}")
        );
    }

    #[tokio::test]
    async fn read_of_unknown_key_is_absent() {
        let store = store();
        let found = store.read(PositionKey::Courier(Uuid::new_v4())).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn sample_expires_after_ttl() {
        let store = store();
        let courier = Uuid::new_v4();
        let key = PositionKey::Courier(courier);

        store
            .write(key, &sample(courier, None, 77.59, 0), 1)
            .await
            .unwrap();
        assert!(store.read(key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.read(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_arrival_wins_even_if_older() {
        let store = store();
        let courier = Uuid::new_v4();

        store
            .record_courier(&sample(courier, None, 77.10, 0))
            .await
            .unwrap();
        store
            .record_courier(&sample(courier, None, 77.20, 60))
            .await
            .unwrap();

        let current = store.courier_position(courier).await.unwrap().unwrap();
        assert_eq!(current.coordinates.lng, 77.20);
    }

    #[tokio::test]
    async fn order_scoped_sample_is_readable_by_order() {
        let store = store();
        let courier = Uuid::new_v4();
        let order = Uuid::new_v4();

        store
            .record_order(order, &sample(courier, Some(order), 77.5, 0))
            .await
            .unwrap();

        let by_order = store.order_position(order).await.unwrap().unwrap();
        assert_eq!(by_order.subject_id, courier);
    }

    #[tokio::test]
    async fn batch_keeps_newest_as_current_and_all_in_history() {
        let store = store();
        let courier = Uuid::new_v4();
        let batch = vec![
            sample(courier, None, 77.1, 30),
            sample(courier, None, 77.3, 0),
            sample(courier, None, 77.2, 10),
        ];

        let latest = store.record_batch(&batch).await.unwrap();
        assert_eq!(latest.coordinates.lng, 77.3);

        let current = store.courier_position(courier).await.unwrap().unwrap();
        assert_eq!(current.coordinates.lng, 77.3);

        let history = store.history(courier).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].coordinates.lng, 77.1);
        assert_eq!(history[2].coordinates.lng, 77.3);
    }

    #[tokio::test]
    async fn history_window_drops_stale_samples() {
        let store = EphemeralPositionStore::new(Arc::new(MemoryCache::new()), 300, 60);
        let courier = Uuid::new_v4();

        store
            .record_batch(&[sample(courier, None, 77.0, 120), sample(courier, None, 77.1, 5)])
            .await
            .unwrap();

        let history = store.history(courier).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].coordinates.lng, 77.1);
    }

    #[tokio::test]
    async fn batch_from_mixed_couriers_is_rejected() {
        let store = store();
        let batch = vec![
            sample(Uuid::new_v4(), None, 77.0, 0),
            sample(Uuid::new_v4(), None, 77.1, 0),
        ];

        assert!(store.record_batch(&batch).await.is_err());
        assert!(store.record_batch(&[]).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_batches_keep_every_sample() {
        let store = Arc::new(store());
        let courier = Uuid::new_v4();

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let sample = sample(courier, None, 77.0 + i as f64 / 1000.0, 0);
                    store.record_batch(&[sample]).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.history(courier).await.unwrap().len(), 64);
    }
}
