//! Criterion benchmarks for color resolution.
//!
//! Run with:
//! ```bash
//! cargo bench --package stick-core --bench color_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stick_core::resolve_color;

const BENCH_COLORS: &[(&str, &str)] = &[
    ("named", "lcd.RED"),
    ("tft_named", "TFT_GREENYELLOW"),
    ("packed_hex", "0xF800"),
    ("packed_decimal", "63488"),
    ("unknown_packed", "0x1234"),
    ("css_hex", "#00FF7F"),
    ("css_rgb", "rgb(12, 34, 56)"),
    ("fallback", "not-a-color"),
];

fn bench_resolve_color(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_color");

    for (name, reference) in BENCH_COLORS {
        group.bench_with_input(BenchmarkId::new("ref", name), reference, |b, reference| {
            b.iter(|| resolve_color(black_box(reference)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resolve_color);
criterion_main!(benches);
