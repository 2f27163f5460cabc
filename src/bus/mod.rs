//! In-process partitioned event log with consumer-group offsets.
//!
//! Records are appended to one partition of a topic chosen by hashing the
//! record key, so every event of one order lands on the same partition and is
//! consumed in publish order. A consumer group owns one cursor per partition;
//! the cursor only moves past a record after the handler finished with it, which
//! makes delivery at-least-once.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::observability::metrics::Metrics;

pub const ORDER_EVENTS_TOPIC: &str = "order-events";
pub const ASSIGNMENT_EVENTS_TOPIC: &str = "assignment-events";

#[derive(Debug, Clone)]
pub struct Record {
    pub id: Uuid,
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: String,
    pub published_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<(), AppError>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, record: &Record) -> Result<(), AppError>;
}

#[derive(Default)]
struct Partition {
    log: RwLock<Vec<Record>>,
    appended: Notify,
    committed: DashMap<String, u64>,
}

impl Partition {
    fn committed(&self, group: &str) -> u64 {
        self.committed.get(group).map(|offset| *offset).unwrap_or(0)
    }
}

pub struct EventBus {
    partitions: usize,
    topics: DashMap<String, Arc<Vec<Partition>>>,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as usize
    }

    fn topic(&self, name: &str) -> Arc<Vec<Partition>> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new((0..self.partitions).map(|_| Partition::default()).collect()))
            .clone()
    }

    /// Waits for the first record at or after the group's cursor. Returns
    /// `None` once the bus is closed.
    pub async fn next_record(&self, topic: &str, group: &str, partition: usize) -> Option<Record> {
        let partitions = self.topic(topic);
        let part = partitions.get(partition)?;

        loop {
            let appended = part.appended.notified();
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            let offset = part.committed(group);
            if let Some(record) = part.log.read().await.get(offset as usize) {
                return Some(record.clone());
            }

            appended.await;
        }
    }

    /// Moves the group's cursor forward to `next_offset`. Never moves it back.
    pub fn commit(&self, topic: &str, group: &str, partition: usize, next_offset: u64) {
        let partitions = self.topic(topic);
        if let Some(part) = partitions.get(partition) {
            let mut cursor = part.committed.entry(group.to_string()).or_insert(0);
            if *cursor < next_offset {
                *cursor = next_offset;
            }
        }
    }

    /// Repositions the group's cursor, forcing redelivery of everything after
    /// `offset`.
    pub fn seek(&self, topic: &str, group: &str, partition: usize, offset: u64) {
        let partitions = self.topic(topic);
        if let Some(part) = partitions.get(partition) {
            part.committed.insert(group.to_string(), offset);
            part.appended.notify_waiters();
        }
    }

    pub fn committed_offset(&self, topic: &str, group: &str, partition: usize) -> u64 {
        self.topic(topic)
            .get(partition)
            .map(|part| part.committed(group))
            .unwrap_or(0)
    }

    /// Number of records the group has not committed yet, across partitions.
    pub async fn lag(&self, topic: &str, group: &str) -> u64 {
        let partitions = self.topic(topic);
        let mut lag = 0;
        for part in partitions.iter() {
            let len = part.log.read().await.len() as u64;
            lag += len.saturating_sub(part.committed(group));
        }
        lag
    }

    /// Every record of a topic, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let partitions = self.topic(topic);
        let mut records = Vec::new();
        for part in partitions.iter() {
            records.extend(part.log.read().await.iter().cloned());
        }
        records
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for topic in self.topics.iter() {
            for part in topic.value().iter() {
                part.appended.notify_waiters();
            }
        }
        info!("event bus closed");
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<(), AppError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Dependency(format!(
                "event bus closed, cannot publish to {topic}"
            )));
        }

        let partition = self.partition_for(key);
        let partitions = self.topic(topic);
        let part = partitions
            .get(partition)
            .ok_or_else(|| AppError::Internal(format!("partition {partition} out of range")))?;

        let mut log = part.log.write().await;
        let record = Record {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            partition,
            offset: log.len() as u64,
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
        };
        debug!(
            topic,
            partition,
            offset = record.offset,
            message_id = %record.id,
            "event published"
        );
        log.push(record);
        drop(log);

        part.appended.notify_waiters();
        Ok(())
    }
}

/// A consumer group subscribed to one topic. Each partition gets its own
/// sequential loop.
pub struct Consumer {
    pub bus: Arc<EventBus>,
    pub topic: String,
    pub group: String,
    pub handler: Arc<dyn MessageHandler>,
    pub redelivery_backoff: Duration,
    pub metrics: Metrics,
}

impl Consumer {
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let consumer = Arc::new(self);
        (0..consumer.bus.partitions())
            .map(|partition| {
                let consumer = consumer.clone();
                tokio::spawn(async move { consumer.run_partition(partition).await })
            })
            .collect()
    }

    pub async fn run_partition(&self, partition: usize) {
        info!(topic = %self.topic, group = %self.group, partition, "consumer started");

        while let Some(record) = self
            .bus
            .next_record(&self.topic, &self.group, partition)
            .await
        {
            match self.handler.handle(&record).await {
                Ok(()) => {
                    self.bus
                        .commit(&self.topic, &self.group, partition, record.offset + 1);
                }
                Err(err) if err.is_retryable() => {
                    self.metrics
                        .events_redelivered_total
                        .with_label_values(&[self.topic.as_str()])
                        .inc();
                    warn!(
                        topic = %self.topic,
                        group = %self.group,
                        partition,
                        offset = record.offset,
                        error = %err,
                        "event left uncommitted, will be redelivered"
                    );
                    tokio::time::sleep(self.redelivery_backoff).await;
                }
                Err(err) => {
                    error!(
                        topic = %self.topic,
                        group = %self.group,
                        partition,
                        offset = record.offset,
                        kind = err.kind(),
                        error = %err,
                        "dropping event"
                    );
                    self.bus
                        .commit(&self.topic, &self.group, partition, record.offset + 1);
                }
            }
        }

        info!(topic = %self.topic, group = %self.group, partition, "consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{Consumer, EventBus, EventPublisher, MessageHandler, Record};
    use crate::error::AppError;
    use crate::observability::metrics::Metrics;

    struct Collect {
        seen: Mutex<Vec<String>>,
        failures_left: AtomicUsize,
        failure: fn() -> AppError,
    }

    impl Collect {
        fn new(failures: usize, failure: fn() -> AppError) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(failures),
                failure,
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, record: &Record) -> Result<(), AppError> {
            self.seen.lock().unwrap().push(record.payload.clone());
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err((self.failure)());
            }
            Ok(())
        }
    }

    fn consumer(bus: Arc<EventBus>, handler: Arc<Collect>) -> Consumer {
        Consumer {
            bus,
            topic: "t".to_string(),
            group: "g".to_string(),
            handler,
            redelivery_backoff: Duration::from_millis(5),
            metrics: Metrics::new(),
        }
    }

    async fn wait_drained(bus: &EventBus) {
        for _ in 0..200 {
            if bus.lag("t", "g").await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("consumer did not drain topic");
    }

    #[test]
    fn same_key_always_maps_to_same_partition() {
        let bus = EventBus::new(8);
        let first = bus.partition_for("order-17");
        for _ in 0..10 {
            assert_eq!(bus.partition_for("order-17"), first);
        }
        assert!(first < 8);
    }

    #[tokio::test]
    async fn records_of_one_key_are_consumed_in_order() {
        let bus = Arc::new(EventBus::new(4));
        let handler = Collect::new(0, || AppError::Internal("unused".to_string()));
        let handles = consumer(bus.clone(), handler.clone()).spawn();

        for i in 0..5 {
            bus.publish("t", "same-key", format!("m{i}")).await.unwrap();
        }
        wait_drained(&bus).await;

        assert_eq!(handler.seen(), vec!["m0", "m1", "m2", "m3", "m4"]);
        bus.close();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn dependency_failures_are_redelivered() {
        let bus = Arc::new(EventBus::new(1));
        let handler = Collect::new(2, || AppError::Dependency("router down".to_string()));
        let _handles = consumer(bus.clone(), handler.clone()).spawn();

        bus.publish("t", "k", "m0".to_string()).await.unwrap();
        bus.publish("t", "k", "m1".to_string()).await.unwrap();
        wait_drained(&bus).await;

        assert_eq!(handler.seen(), vec!["m0", "m0", "m0", "m1"]);
        assert_eq!(bus.committed_offset("t", "g", 0), 2);
        bus.close();
    }

    #[tokio::test]
    async fn non_retryable_failures_are_committed() {
        let bus = Arc::new(EventBus::new(1));
        let handler = Collect::new(1, || AppError::NotFound("order 3".to_string()));
        let _handles = consumer(bus.clone(), handler.clone()).spawn();

        bus.publish("t", "k", "m0".to_string()).await.unwrap();
        bus.publish("t", "k", "m1".to_string()).await.unwrap();
        wait_drained(&bus).await;

        assert_eq!(handler.seen(), vec!["m0", "m1"]);
        bus.close();
    }

    #[tokio::test]
    async fn seek_replays_committed_records() {
        let bus = Arc::new(EventBus::new(1));
        let handler = Collect::new(0, || AppError::Internal("unused".to_string()));
        let _handles = consumer(bus.clone(), handler.clone()).spawn();

        bus.publish("t", "k", "m0".to_string()).await.unwrap();
        wait_drained(&bus).await;
        bus.seek("t", "g", 0, 0);
        wait_drained(&bus).await;

        assert_eq!(handler.seen(), vec!["m0", "m0"]);
        bus.close();
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish() {
        let bus = EventBus::new(2);
        bus.close();
        let err = bus.publish("t", "k", "m".to_string()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
