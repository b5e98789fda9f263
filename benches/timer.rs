//! Cost of the min-heap timer's `add`/`adjust`/`tick` operations under a
//! realistic number of simultaneously tracked connections.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hivewire::timer::{ExpireReason, Timer};

fn insert_many(c: &mut Criterion) {
    c.bench_function("timer_add_1000_entries", |b| {
        b.iter(|| {
            let mut timer = Timer::new();
            for fd in 0..1000 {
                timer.add(black_box(fd), 30_000, ExpireReason::IdleTimeout);
            }
            timer
        });
    });
}

fn adjust_existing(c: &mut Criterion) {
    c.bench_function("timer_adjust_existing_entry_among_1000", |b| {
        let mut timer = Timer::new();
        for fd in 0..1000 {
            timer.add(fd, 30_000, ExpireReason::IdleTimeout);
        }
        b.iter(|| {
            timer.adjust(black_box(500), 30_000);
        });
    });
}

fn tick_with_due_entries(c: &mut Criterion) {
    c.bench_function("timer_tick_expires_due_entries_among_1000", |b| {
        b.iter_batched(
            || {
                let mut timer = Timer::new();
                for fd in 0..1000 {
                    timer.add(fd, 0, ExpireReason::IdleTimeout);
                }
                timer
            },
            |mut timer| {
                black_box(timer.tick());
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, insert_many, adjust_existing, tick_with_due_entries);
criterion_main!(benches);
