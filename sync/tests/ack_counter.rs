mod common;

use common::init_tracing;
use fibre_sync::{AcknowledgementCounter, CompoundKey, CounterStore, ManualScheduler, MemoryCounterStore};
use std::sync::Arc;
use std::time::Duration;

fn counter(scheduler: &Arc<ManualScheduler>) -> AcknowledgementCounter<CompoundKey> {
  init_tracing();
  AcknowledgementCounter::builder()
    .scheduler(scheduler.clone())
    .build()
    .unwrap()
}

#[test]
fn test_only_first_delivery_is_reported() {
  let scheduler = Arc::new(ManualScheduler::new());
  let counter = counter(&scheduler);
  let key = CompoundKey::new(10, 1);

  assert!(counter.record_event(key));
  assert!(!counter.record_event(key));
  assert!(!counter.record_event(key));
  assert_eq!(counter.count(&key), 3);
  assert!(counter.record_event(CompoundKey::new(10, 2)));
}

#[test]
fn test_scheduled_clear_waits_for_the_delay() {
  let scheduler = Arc::new(ManualScheduler::new());
  let counter = counter(&scheduler);
  let key = CompoundKey::new(1, 1);
  assert_eq!(counter.clear_delay(), Duration::from_millis(200));

  counter.record_event(key);
  counter.schedule_clear(key);

  // 1. A late redelivery inside the window is still a repeat.
  scheduler.advance(Duration::from_millis(150));
  assert!(!counter.record_event(key));

  // 2. After the window the key starts over.
  scheduler.advance(Duration::from_millis(60));
  assert_eq!(counter.count(&key), 0);
  assert!(counter.record_event(key));
}

#[test]
fn test_store_keeps_counts_across_instances() {
  let scheduler = Arc::new(ManualScheduler::new());
  let store = Arc::new(MemoryCounterStore::new());
  let build = || {
    AcknowledgementCounter::<CompoundKey>::builder()
      .scheduler(scheduler.clone())
      .store(store.clone())
      .build()
      .unwrap()
  };

  let key = CompoundKey::new(3, 7);
  let before = build();
  assert!(before.record_event(key));
  assert_eq!(store.get("ack_3_7#"), Some(1));
  drop(before);

  // A fresh counter, as after a process restart, remembers the delivery.
  let after = build();
  assert!(!after.record_event(key));
  assert_eq!(after.count(&key), 2);

  // Clearing "3_7" must leave "3_70" alone.
  let neighbour = CompoundKey::new(3, 70);
  after.record_event(neighbour);
  assert_eq!(after.clear_now(&key), 2);
  assert_eq!(store.get("ack_3_7#"), None);
  assert_eq!(store.get("ack_3_70#"), Some(1));

  after.clear_all();
  assert!(store.is_empty());
}
