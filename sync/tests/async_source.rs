#![cfg(feature = "tokio")]

use fibre_sync::{
  AsyncEntrySource, Entry, EntryWatcher, KeyedEntryCache, Membership, TokioSpawner, UiScheduler, UiThread,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_source_resolves_on_the_ui_thread() {
  let fetches = Arc::new(AtomicUsize::new(0));
  let ui = Arc::new(UiThread::spawn("async-ui").unwrap());

  let source = AsyncEntrySource::new(Arc::new(TokioSpawner::new()), {
    let fetches = fetches.clone();
    move |keys: Vec<u64>| {
      let fetches = fetches.clone();
      async move {
        fetches.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(20)).await;
        keys
          .into_iter()
          .map(|k| {
            let result: Result<String, String> = if k % 2 == 0 {
              Ok(format!("even-{k}"))
            } else {
              Err(format!("odd-{k}"))
            };
            (k, result)
          })
          .collect::<Vec<_>>()
      }
    }
  });

  let cache: KeyedEntryCache<u64, String, String> = KeyedEntryCache::builder()
    .scheduler(ui.clone())
    .source(source)
    .build()
    .unwrap();

  let (tx, mut rx) = mpsc::unbounded_channel();
  let watcher: Arc<dyn EntryWatcher<u64, String, String>> = {
    let ui = ui.clone();
    Arc::new(move |entry: &Entry<u64, String, String>| {
      let _ = tx.send((*entry.key(), entry.is_error(), ui.is_current()));
    })
  };

  cache.request_many([2, 3], &watcher, Membership::Strong).unwrap();
  cache.request(2, &watcher, Membership::Strong).unwrap();

  let mut received = Vec::new();
  for _ in 0..3 {
    let item = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    received.push(item);
  }
  received.sort();

  assert_eq!(received, vec![(2, false, true), (2, false, true), (3, true, true)]);
  assert_eq!(fetches.load(Ordering::SeqCst), 1, "both keys travel in one batch");
}
