//! Join engine benchmarks
//!
//! Measures joint-firing throughput and scan chain overhead.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tributary_core::broadcast::Relay;
use tributary_core::scan::{running_average, running_count, running_sum};
use tributary_core::{and, when};

fn bench_pair_join_throughput(c: &mut Criterion) {
    c.bench_function("join_pair_fire", |b| {
        let left = Relay::new();
        let right = Relay::new();
        let plan = and(&left.stream(), &right.stream()).then(|v: &[i64]| Ok(v[0] + v[1]));
        let _sub = when(vec![plan]).subscribe_with(|sum| {
            black_box(sum);
        });

        let mut i = 0_i64;
        b.iter(|| {
            left.push(i);
            right.push(i);
            i += 1;
        });
    });
}

fn bench_scan_chain(c: &mut Criterion) {
    c.bench_function("scan_sum_count_avg_tick", |b| {
        let relay = Relay::new();
        let stream = relay.stream();
        let _sum = running_sum(&stream).subscribe_with(|x| {
            black_box(x);
        });
        let _count = running_count(&stream).subscribe_with(|x| {
            black_box(x);
        });
        let _avg = running_average(&stream).subscribe_with(|x| {
            black_box(x);
        });

        let mut i = 0_i64;
        b.iter(|| {
            relay.push(i);
            i += 1;
        });
    });
}

criterion_group!(benches, bench_pair_join_throughput, bench_scan_chain);
criterion_main!(benches);
