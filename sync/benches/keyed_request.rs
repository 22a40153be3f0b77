use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_sync::{
  BatchResult, Entry, EntrySource, EntryWatcher, KeyedEntryCache, ManualScheduler, Membership, Reply,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Answers every call inline, so the only cost left is the cache itself.
struct InstantSource;

impl EntrySource<u64, u64, ()> for InstantSource {
  fn request_data(&self, keys: Vec<u64>, reply: Reply<BatchResult<u64, u64, ()>>) {
    reply.send(keys.into_iter().map(|k| (k, Ok(k * 2))).collect());
  }
}

fn setup(max_batch_size: usize) -> (Arc<ManualScheduler>, KeyedEntryCache<u64, u64, ()>) {
  let scheduler = Arc::new(ManualScheduler::new());
  let cache = KeyedEntryCache::builder()
    .scheduler(scheduler.clone())
    .source(InstantSource)
    .max_batch_size(max_batch_size)
    .build()
    .unwrap();
  (scheduler, cache)
}

fn counting_watcher() -> (Arc<AtomicU64>, Arc<dyn EntryWatcher<u64, u64, ()>>) {
  let seen = Arc::new(AtomicU64::new(0));
  let s = seen.clone();
  let watcher: Arc<dyn EntryWatcher<u64, u64, ()>> = Arc::new(move |entry: &Entry<u64, u64, ()>| {
    s.fetch_add(*entry.key(), Ordering::Relaxed);
  });
  (seen, watcher)
}

fn bench_resolved_hits(c: &mut Criterion) {
  let (scheduler, cache) = setup(100);
  let (seen, watcher) = counting_watcher();
  cache.request_many(0..1_000, &watcher, Membership::Strong).unwrap();
  scheduler.run_until_idle();

  let mut group = c.benchmark_group("KeyedRequest");
  group.throughput(Throughput::Elements(1_000));
  group.bench_function("resolved_hits", |b| {
    b.iter(|| {
      for key in 0..1_000u64 {
        cache.request(black_box(key), &watcher, Membership::Strong).unwrap();
      }
    })
  });
  group.finish();
  black_box(seen.load(Ordering::Relaxed));
}

fn bench_cold_batches(c: &mut Criterion) {
  let mut group = c.benchmark_group("KeyedRequestCold");
  for batch in [1usize, 10, 100] {
    group.throughput(Throughput::Elements(1_000));
    group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
      b.iter_batched(
        || setup(batch),
        |(scheduler, cache)| {
          let (_seen, watcher) = counting_watcher();
          cache.request_many(0..1_000, &watcher, Membership::Strong).unwrap();
          scheduler.run_until_idle()
        },
        criterion::BatchSize::SmallInput,
      )
    });
  }
  group.finish();
}

criterion_group!(benches, bench_resolved_hits, bench_cold_batches);
criterion_main!(benches);
