mod common;

use common::*;
use fibre_sync::{KeyedEntryCache, ManualScheduler, Membership, RequestError};
use std::sync::{Arc, Barrier};
use std::thread;

fn build(source: &Arc<ParkedSource>) -> (Arc<ManualScheduler>, KeyedEntryCache<u32, String, String>) {
  init_tracing();
  let scheduler = Arc::new(ManualScheduler::new());
  let cache = KeyedEntryCache::builder()
    .scheduler(scheduler.clone())
    .shared_source(source.clone())
    .build()
    .unwrap();
  (scheduler, cache)
}

#[test]
fn test_request_coalesces_and_resolves() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let first = EntryLog::new();
  let second = EntryLog::new();

  // 1. Two requests for the same key produce a single transport call.
  cache.request(1, &as_watcher(&first), Membership::Strong).unwrap();
  cache.request(1, &as_watcher(&second), Membership::Strong).unwrap();
  assert_eq!(source.call_count(), 1);
  assert!(cache.is_pending(&1));

  // 2. The answer is applied on the ui context only.
  assert_eq!(source.answer_next(), vec![1]);
  assert_eq!(first.len(), 0, "results must wait for the ui context");
  scheduler.run_until_idle();
  assert_eq!(first.values(), vec![(1, Some("user-1".to_string()))]);
  assert_eq!(second.values(), vec![(1, Some("user-1".to_string()))]);
  assert!(!cache.is_pending(&1));

  // 3. A resolved entry is delivered synchronously.
  let third = EntryLog::new();
  cache.request(1, &as_watcher(&third), Membership::Strong).unwrap();
  assert_eq!(third.len(), 1);
  assert_eq!(source.call_count(), 1);

  let metrics = cache.metrics();
  assert_eq!(metrics.misses, 1);
  assert_eq!(metrics.coalesced, 1);
  assert_eq!(metrics.hits, 1);
}

#[test]
fn test_concurrent_requests_issue_one_call() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let num_threads = 16;
  let barrier = Arc::new(Barrier::new(num_threads));
  let logs: Vec<_> = (0..num_threads).map(|_| EntryLog::new()).collect();

  let handles: Vec<_> = logs
    .iter()
    .map(|log| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      let watcher = as_watcher(log);
      thread::spawn(move || {
        barrier.wait();
        cache.request(7, &watcher, Membership::Strong).unwrap();
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap();
  }

  assert_eq!(source.call_count(), 1, "all threads must share one fetch");
  source.answer_next();
  scheduler.run_until_idle();
  for log in &logs {
    assert_eq!(log.values(), vec![(7, Some("user-7".to_string()))]);
  }
}

#[test]
fn test_request_many_respects_batch_size() {
  let source = ParkedSource::new();
  let scheduler = Arc::new(ManualScheduler::new());
  let cache: KeyedEntryCache<u32, String, String> = KeyedEntryCache::builder()
    .scheduler(scheduler.clone())
    .shared_source(source.clone())
    .max_batch_size(2)
    .build()
    .unwrap();
  let log = EntryLog::new();

  cache
    .request_many([1, 2, 3, 4, 5], &as_watcher(&log), Membership::Strong)
    .unwrap();

  let sizes: Vec<usize> = source.calls.lock().iter().map(|(keys, _)| keys.len()).collect();
  assert_eq!(sizes, vec![2, 2, 1]);
  assert_eq!(cache.metrics().keys_fetched, 5);

  while !source.calls.lock().is_empty() {
    source.answer_next();
  }
  scheduler.run_until_idle();
  assert_eq!(log.len(), 5);
}

#[test]
fn test_error_entries_stay_until_restart() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let log = EntryLog::new();

  cache.request(4, &as_watcher(&log), Membership::Strong).unwrap();
  let (keys, reply) = source.take();
  reply.send(keys.into_iter().map(|k| (k, Err("not found".to_string()))).collect());
  scheduler.run_until_idle();

  let entries = log.entries.lock().clone();
  assert_eq!(entries.len(), 1);
  assert!(entries[0].is_error());
  assert_eq!(entries[0].error().map(|e| e.as_str()), Some("not found"));

  // The error is cached like a value.
  cache.request(4, &as_watcher(&log), Membership::Strong).unwrap();
  assert_eq!(source.call_count(), 1);
  assert_eq!(log.len(), 2);

  cache.restart();
  cache.request(4, &as_watcher(&log), Membership::Strong).unwrap();
  assert_eq!(source.call_count(), 2, "a restart must force a refetch");
  source.answer_next();
  scheduler.run_until_idle();
  assert_eq!(log.values().last(), Some(&(4, Some("user-4".to_string()))));
}

#[test]
fn test_restart_drops_in_flight_results_and_refetches_waiters() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let log = EntryLog::new();

  cache.request(9, &as_watcher(&log), Membership::Strong).unwrap();
  let stale = source.take();

  // 1. The waiter is still alive, so the restart refetches its key.
  cache.restart();
  assert_eq!(cache.generation(), 1);
  assert_eq!(source.call_count(), 2);
  assert!(cache.is_pending(&9));

  // 2. The answer from before the restart is discarded.
  stale.1.send(vec![(9, Ok("old".to_string()))]);
  scheduler.run_until_idle();
  assert_eq!(log.len(), 0);
  assert_eq!(cache.metrics().stale_dropped, 1);

  // 3. The fresh answer reaches the same waiter.
  source.answer_next();
  scheduler.run_until_idle();
  assert_eq!(log.values(), vec![(9, Some("user-9".to_string()))]);
}

#[test]
fn test_abandoned_reply_clears_pending_state() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let first = EntryLog::new();
  let second = EntryLog::new();

  cache.request(5, &as_watcher(&first), Membership::Strong).unwrap();
  drop(source.take());
  scheduler.run_until_idle();
  assert!(!cache.is_pending(&5));
  assert_eq!(cache.metrics().abandoned, 1);

  // The next request fetches again and every waiter is served.
  cache.request(5, &as_watcher(&second), Membership::Strong).unwrap();
  assert_eq!(source.call_count(), 2);
  source.answer_next();
  scheduler.run_until_idle();
  assert_eq!(first.len(), 1);
  assert_eq!(second.len(), 1);
}

#[test]
fn test_unsupported_key_is_rejected_up_front() {
  let source = ParkedSource::new();
  let (_scheduler, cache) = build(&source);
  let log = EntryLog::new();

  let err = cache
    .request_many([3, 0], &as_watcher(&log), Membership::Strong)
    .unwrap_err();
  assert!(matches!(err, RequestError::UnsupportedKey { .. }));
  assert_eq!(source.call_count(), 0);
  assert!(!cache.is_pending(&3), "nothing may be registered on rejection");
}

#[test]
fn test_subscribers_follow_pushed_updates() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let subscriber = EntryLog::new();
  let watcher = as_watcher(&subscriber);

  assert!(cache.subscribe(&3, &watcher, Membership::Strong));
  assert!(!cache.subscribe(&3, &watcher, Membership::Strong));
  assert_eq!(*source.watch_log.lock(), vec![(3, true)]);

  cache.put(3, "pushed".to_string());
  assert!(cache.peek(&3).is_none(), "put is applied on the ui context");
  scheduler.run_until_idle();
  assert_eq!(subscriber.values(), vec![(3, Some("pushed".to_string()))]);
  let peeked = cache.peek(&3).unwrap();
  assert_eq!(peeked.value().map(|v| v.as_str()), Some("pushed"));

  assert!(cache.unsubscribe(&3, &watcher));
  assert_eq!(*source.watch_log.lock(), vec![(3, true), (3, false)]);
}

#[test]
fn test_weak_waiter_can_go_away() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let log = EntryLog::new();

  cache.request(8, &as_watcher(&log), Membership::Weak).unwrap();
  drop(log);
  source.answer_next();
  scheduler.run_until_idle();
  assert_eq!(cache.len(), 1);
}

#[test]
fn test_invalidate_forces_a_refetch() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let log = EntryLog::new();

  cache.request(2, &as_watcher(&log), Membership::Strong).unwrap();
  source.answer_next();
  scheduler.run_until_idle();

  assert!(cache.invalidate(&2));
  assert!(cache.peek(&2).is_some(), "invalid entries can still be peeked");
  cache.request(2, &as_watcher(&log), Membership::Strong).unwrap();
  assert_eq!(source.call_count(), 2);

  assert!(!cache.invalidate(&42));
}

#[test]
fn test_error_is_replaced_after_invalidation() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let subscriber = EntryLog::new();
  let waiter = EntryLog::new();
  cache.subscribe(&6, &as_watcher(&subscriber), Membership::Strong);

  cache.request(6, &as_watcher(&waiter), Membership::Strong).unwrap();
  source.take().1.send(vec![(6, Err("boom".to_string()))]);
  scheduler.run_until_idle();
  assert!(cache.peek(&6).unwrap().is_error());

  cache.invalidate(&6);
  cache.request(6, &as_watcher(&waiter), Membership::Strong).unwrap();
  source.answer_next();
  scheduler.run_until_idle();

  assert_eq!(subscriber.values(), vec![(6, None), (6, Some("user-6".to_string()))]);
  assert_eq!(waiter.values(), vec![(6, None), (6, Some("user-6".to_string()))]);
  assert!(!cache.peek(&6).unwrap().is_error());
}

#[test]
fn test_repeated_requests_from_one_watcher_deliver_once() {
  let source = ParkedSource::new();
  let (scheduler, cache) = build(&source);
  let log = EntryLog::new();
  let watcher = as_watcher(&log);

  // 1. A key repeated within one call is fetched and queued once.
  cache.request_many([4, 4, 5], &watcher, Membership::Strong).unwrap();
  // 2. The same watcher asking again while the fetch is in flight.
  cache.request(4, &watcher, Membership::Weak).unwrap();
  assert_eq!(source.call_count(), 1);

  assert_eq!(source.answer_next(), vec![4, 5]);
  scheduler.run_until_idle();
  let mut values = log.values();
  values.sort();
  assert_eq!(
    values,
    vec![(4, Some("user-4".to_string())), (5, Some("user-5".to_string()))]
  );

  // 3. Repeated keys that are already resolved are delivered once too.
  let later = EntryLog::new();
  cache.request_many([5, 5], &as_watcher(&later), Membership::Strong).unwrap();
  assert_eq!(later.len(), 1);
}
