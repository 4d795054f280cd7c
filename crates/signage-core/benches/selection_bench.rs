//! Criterion benchmarks for playlist selection and update diffing.
//!
//! Selection runs on every rotation tick and diffing on every content update,
//! so both should stay well under a millisecond for realistic playlists.
//!
//! Run with:
//! ```bash
//! cargo bench --package signage-core --bench selection_bench
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use signage_core::domain::rotation::plan_reload;
use signage_core::{ContentRef, PlaylistItem, Rotation};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_playlist(len: usize) -> Vec<PlaylistItem> {
    (0..len)
        .map(|i| PlaylistItem {
            id: format!("item-{i}"),
            content_id: format!("content-{i}"),
            content: ContentRef {
                url: format!("https://cdn.example.com/{i}.html"),
                name: format!("Item {i}"),
            },
            display_duration: 10_000,
            order_index: i as i64,
            // Every other item only runs overnight, so half the scan skips.
            time_window_start: (i % 2 == 1).then(|| "22:00".to_string()),
            time_window_end: (i % 2 == 1).then(|| "06:00".to_string()),
            days_of_week: Some(vec![1, 2, 3, 4, 5]),
        })
        .collect()
}

fn wednesday_noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 5)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .expect("valid fixture date")
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_select_next(c: &mut Criterion) {
    let now = wednesday_noon();
    let mut group = c.benchmark_group("select_next");
    for len in [5usize, 50, 500] {
        let mut rotation = Rotation::new(make_playlist(len));
        group.bench_with_input(BenchmarkId::new("items", len), &len, |b, _| {
            b.iter(|| rotation.select_next(black_box(now)))
        });
    }
    group.finish();
}

fn bench_plan_reload(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_reload");
    for len in [5usize, 50, 500] {
        let current = make_playlist(len);
        let mut incoming = current.clone();
        incoming.reverse();
        group.bench_with_input(BenchmarkId::new("items", len), &len, |b, _| {
            b.iter(|| plan_reload(black_box(&current), black_box(&incoming), Some("item-0")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_next, bench_plan_reload);
criterion_main!(benches);
