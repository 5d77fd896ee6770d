// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Send/progress throughput benchmarks, in the shape of the teacher's
// benches/alloc.rs (grouped by workload, Throughput::Bytes per group).
// Where the teacher compares allocation strategies at fixed message
// sizes, this compares the two payload-handoff modes this transport
// actually has — am_short (inline) and am_bcopy (descriptor-backed) — at
// sizes chosen against the default FIFO_ELEM_SIZE/SEG_SIZE so "small"
// stays inline and "medium"/"large" force the bcopy path.
//
// Run with:
//   cargo bench --bench transport

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mm_transport::{AmDisposition, Config, PosixSegmentMapper, ReceiverInterface};

const SMALL: usize = 48; // fits inline at the default 128-byte elem_size
const MEDIUM: usize = 256; // exceeds inline capacity, fits one bcopy descriptor
const LARGE: usize = 4096; // well within the default 8256-byte SEG_SIZE

const SIZES: &[(&str, usize)] = &[
    ("small_48", SMALL),
    ("medium_256", MEDIUM),
    ("large_4096", LARGE),
];

fn harness(seg_size: usize) -> (ReceiverInterface, mm_transport::SenderEndpoint) {
    let cfg = Config {
        fifo_size: 256,
        elem_size: 128,
        seg_size,
        ..Config::default()
    };
    let mut iface = ReceiverInterface::new(cfg, Arc::new(PosixSegmentMapper), true).unwrap();
    let addr = iface.get_address();
    let ep = iface.create_endpoint(&addr).unwrap();
    (iface, ep)
}

fn bench_am_short(c: &mut Criterion) {
    let mut group = c.benchmark_group("am_short_round_trip");

    for &(label, size) in SIZES.iter().filter(|&&(_, s)| s <= 64) {
        let (mut iface, ep) = harness(8256);
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, _| {
            b.iter(|| {
                ep.am_short(1, &payload).unwrap();
                let mut retained = Vec::new();
                iface
                    .progress(
                        &mut |_, data| {
                            black_box(data.len());
                            AmDisposition::Consumed
                        },
                        &mut retained,
                    )
                    .ok();
            });
        });
    }

    group.finish();
}

fn bench_am_bcopy(c: &mut Criterion) {
    let mut group = c.benchmark_group("am_bcopy_round_trip");

    for &(label, size) in SIZES {
        let (mut iface, ep) = harness(8256);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            b.iter(|| {
                ep.am_bcopy(2, |buf| {
                    let n = sz.min(buf.len());
                    buf[..n].fill(0xCD);
                    n
                })
                .unwrap();
                let mut retained = Vec::new();
                iface
                    .progress(
                        &mut |_, data| {
                            black_box(data.len());
                            AmDisposition::Consumed
                        },
                        &mut retained,
                    )
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_burst_then_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst_then_drain");
    group.throughput(Throughput::Elements(64));

    group.bench_function("fifo_256_burst_64", |b| {
        let (mut iface, ep) = harness(8256);
        b.iter(|| {
            for i in 0..64u8 {
                ep.am_short(i, &[i]).unwrap();
            }
            let mut retained = Vec::new();
            let mut total = 0u32;
            loop {
                let n = iface
                    .progress(&mut |_, _| AmDisposition::Consumed, &mut retained)
                    .unwrap();
                total += n;
                if n == 0 {
                    break;
                }
            }
            black_box(total);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_am_short,
    bench_am_bcopy,
    bench_burst_then_drain,
);
criterion_main!(benches);
