//! Dereference fast-path and scope open/close costs.
//!
//! Run with:
//!   cargo bench --bench deref

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ferne::{DerefScope, FakeDevice, FarMemConfig, FarMemManager};

fn bench_deref(c: &mut Criterion) {
    let m = FarMemManager::build(
        FarMemConfig {
            cache_size: 32 << 20,
            far_mem_size: 256 << 20,
            num_gc_threads: 2,
            max_far_ptrs: 1 << 12,
        },
        Box::new(FakeDevice::new(256 << 20)),
    );

    let hot = m.allocate_far_ptr_with(0xA5A5_A5A5u64);
    // Drive the countdown so the loop below stays on the one-load path.
    black_box(hot.read());
    black_box(hot.read());

    c.bench_function("deref_hot", |b| {
        let scope = DerefScope::new();
        b.iter(|| black_box(hot.deref(&scope)));
    });

    c.bench_function("deref_mut_hot", |b| {
        let scope = DerefScope::new();
        b.iter(|| black_box(hot.deref_mut(&scope)));
    });

    c.bench_function("scope_open_close", |b| {
        b.iter(|| drop(black_box(DerefScope::new())));
    });

    c.bench_function("read_with_scope", |b| {
        b.iter(|| black_box(hot.read()));
    });
}

criterion_group!(benches, bench_deref);
criterion_main!(benches);
