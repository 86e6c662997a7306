//! Criterion benchmarks for the DCC frame codec.
//!
//! Function-group encoding sits on the hot path of every function button
//! press, so it is measured per group alongside speed and stop frames.
//!
//! Run with:
//! ```bash
//! cargo bench --package dcc-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dcc_core::protocol::{
    encode_emergency_stop, encode_function_group, encode_speed_and_direction, parse_cv_read,
};
use dcc_core::{Address, Direction, FunctionIndex, FunctionStates, Speed};

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_speed(c: &mut Criterion) {
    let address = Address::new(1234).unwrap();
    let speed = Speed::new(80).unwrap();

    let mut group = c.benchmark_group("loco_control");
    group.bench_function("speed_and_direction", |b| {
        b.iter(|| {
            encode_speed_and_direction(black_box(address), black_box(speed), Direction::Reverse)
        })
    });
    group.bench_function("emergency_stop", |b| {
        b.iter(|| encode_emergency_stop(black_box(address), Direction::Forward))
    });
    group.finish();
}

fn bench_function_groups(c: &mut Criterion) {
    let address = Address::new(3).unwrap();
    let states = (0u8..=28)
        .step_by(3)
        .filter_map(|i| FunctionIndex::new(i).ok())
        .fold(FunctionStates::all_off(), |acc, f| acc.with(f, true));

    let mut group = c.benchmark_group("function_group");
    for first in [0u8, 5, 9, 13, 21] {
        let index = FunctionIndex::new(first).unwrap();
        group.bench_with_input(BenchmarkId::new("group", first), &index, |b, index| {
            b.iter(|| encode_function_group(black_box(address), *index, black_box(&states)))
        });
    }
    group.finish();
}

fn bench_reply(c: &mut Criterion) {
    c.bench_function("parse_cv_read", |b| {
        b.iter(|| parse_cv_read(black_box(&[0x2A, b'!'])))
    });
}

criterion_group!(benches, bench_speed, bench_function_groups, bench_reply);
criterion_main!(benches);
