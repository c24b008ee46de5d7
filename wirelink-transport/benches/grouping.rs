use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use wirelink_core::{BatchError, RequestParams};
use wirelink_transport::{
    encode_get_query, BatchFetch, BatchLoader, DataLoader, HttpBatchLoader, Requester, UnitResolver,
};

struct EchoLoader {
    max: usize,
}

impl BatchLoader for EchoLoader {
    type Key = u64;
    type Value = u64;
    type Error = BatchError;

    fn validate(&self, keys: &[u64]) -> bool {
        keys.len() <= self.max
    }

    fn fetch(&self, keys: Vec<u64>, _resolver: UnitResolver<u64>) -> BatchFetch<u64, BatchError> {
        BatchFetch::new(async move { Ok(keys.into_iter().map(Some).collect()) })
    }
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dataloader_dispatch");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for size in [1u64, 10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("loads", size), &size, |b, &size| {
            b.iter(|| {
                runtime.block_on(async {
                    let loader = DataLoader::new(EchoLoader { max: 100 });
                    let handles: Vec<_> = (0..size).map(|k| loader.load(k)).collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                })
            })
        });
    }

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_validation");
    let loader = HttpBatchLoader::new(Requester::new("http://localhost:8080/batch"))
        .max_url_length(Some(2048));

    for size in [1usize, 10, 50] {
        let items: Vec<RequestParams> = (0..size)
            .map(|i| RequestParams::get(format!("/users/{}", i)).query("fields", "id,name"))
            .collect();
        group.bench_with_input(BenchmarkId::new("get_url", size), &items, |b, items| {
            b.iter(|| black_box(loader.validate(items)))
        });
        group.bench_with_input(BenchmarkId::new("encode_query", size), &items, |b, items| {
            b.iter(|| black_box(encode_get_query(items)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_validation);
criterion_main!(benches);
