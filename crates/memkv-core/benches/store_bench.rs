use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memkv_core::LruStore;

fn put_hot_key(c: &mut Criterion) {
    c.bench_function("put same key repeatedly", |b| {
        let mut store = LruStore::new(1024);
        b.iter(|| {
            store.put(black_box(b"k"), black_box(b"value"));
        });
    });
}

fn put_until_eviction(c: &mut Criterion) {
    c.bench_function("put distinct keys under a tight budget", |b| {
        b.iter(|| {
            let mut store = LruStore::new(4096);
            for i in 0..1000u32 {
                let key = i.to_be_bytes();
                store.put(black_box(&key), black_box(b"value"));
            }
        });
    });
}

fn get_hit(c: &mut Criterion) {
    let mut store = LruStore::new(1024);
    store.put(b"k", b"value");
    c.bench_function("get on a resident key", |b| {
        b.iter(|| {
            black_box(store.get(black_box(b"k")));
        });
    });
}

criterion_group!(benches, put_hot_key, put_until_eviction, get_hit);
criterion_main!(benches);
