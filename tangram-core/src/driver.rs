/*
    driver.rs - The scheduling pump

    The replication core is a set of synchronous state machines; this is
    the one place that owns real timers. It supplies the two ticks the
    design depends on:
    - the coalesced-update flush (the "zero-delay deferred callback" of the
      single-threaded original, here a short interval)
    - the task/timeout poll driving inactivity deadlines

    The two periods are tunables, not load-bearing constants; no relative
    ordering between them may be assumed.
*/

use crate::core_store::object_store::ObjectStore;
use crate::core_sync::synchronizer::ObjectSynchronizer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Coalescing window: how often queued updates are published
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// How often task deadlines are polled
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            flush_interval: Duration::from_millis(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Owns the background tick loop. Dropping the driver without `shutdown`
/// aborts the loop at the next await point.
pub struct SyncDriver {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl SyncDriver {
    pub fn spawn(
        store: Arc<ObjectStore>,
        synchronizer: Arc<ObjectSynchronizer>,
        config: DriverConfig,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut flush_tick = tokio::time::interval(config.flush_interval);
            let mut poll_tick = tokio::time::interval(config.poll_interval);
            flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = flush_tick.tick() => {
                        store.flush_updates();
                    }
                    _ = poll_tick.tick() => {
                        synchronizer.poll_now();
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("sync driver stopped");
        });

        SyncDriver { handle, shutdown }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_event::event::EventName;
    use crate::core_event::event_system::EventSystem;
    use crate::core_store::game_object::ObjectId;
    use crate::core_store::object_factory::ObjectFactory;
    use crate::core_store::object_store::StoreConfig;
    use crate::core_store::sync_entity::SyncEntity;
    use crate::core_sync::synchronizer::SyncConfig;
    use crate::test_utils::RecordingConnection;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_driver_flushes_queued_updates() {
        let bus = EventSystem::new();
        let store = ObjectStore::new(StoreConfig::default(), bus.clone());
        let factory = Arc::new(ObjectFactory::new());
        let network = RecordingConnection::new("driver-peer");
        let synchronizer = ObjectSynchronizer::new(
            SyncConfig::default(),
            bus.clone(),
            store.clone(),
            factory,
            network,
        );

        let updates = Arc::new(Mutex::new(0usize));
        {
            let updates = updates.clone();
            bus.register("driver-test")
                .on(EventName::UpdateGameObject, move |_| {
                    *updates.lock().unwrap() += 1;
                });
        }

        store
            .add(
                Box::new(SyncEntity::new("card", ObjectId::from("x1"))),
                false,
            )
            .unwrap();

        let driver = SyncDriver::spawn(store.clone(), synchronizer, DriverConfig::default());

        store.set_field(&ObjectId::from("x1"), "name", json!("ace")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        driver.shutdown().await;

        assert_eq!(*updates.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_driver_shutdown_is_clean() {
        let bus = EventSystem::new();
        let store = ObjectStore::new(StoreConfig::default(), bus.clone());
        let factory = Arc::new(ObjectFactory::new());
        let network = RecordingConnection::new("driver-peer");
        let synchronizer = ObjectSynchronizer::new(
            SyncConfig::default(),
            bus.clone(),
            store.clone(),
            factory,
            network,
        );

        let driver = SyncDriver::spawn(store, synchronizer, DriverConfig::default());
        driver.shutdown().await;
    }

    #[test]
    fn test_driver_config_defaults() {
        let config = DriverConfig::default();
        assert!(config.flush_interval < config.poll_interval);
    }
}
