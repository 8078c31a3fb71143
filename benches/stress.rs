use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::{stream, StreamExt};
use ulid::Ulid;

use daybook::catalog::InMemoryCatalog;
use daybook::clock::Clock;
use daybook::dispatcher::NoopDispatcher;
use daybook::engine::{BookingItem, BookingRequest, Engine, SeasonInput};
use daybook::model::Customer;
use daybook::notify::NotifyHub;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap_or_default()
}

fn nth_day(n: u64) -> NaiveDate {
    epoch().checked_add_days(Days::new(n)).unwrap_or_default()
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn bench_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("daybook_bench");
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let _ = std::fs::remove_file(&path);
    path
}

struct Bench {
    engine: Arc<Engine>,
    catalog: Arc<InMemoryCatalog>,
}

impl Bench {
    fn new(name: &str) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let engine = Engine::new(
            bench_wal_path(name),
            Arc::new(NotifyHub::new()),
            catalog.clone(),
            Arc::new(NoopDispatcher),
        )
        .unwrap_or_else(|e| panic!("engine failed to open: {e}"))
        .with_clock(Clock::Fixed(epoch()));
        Self {
            engine: Arc::new(engine),
            catalog,
        }
    }

    /// A resource with one active season covering `days` days from the epoch.
    async fn resource(&self, days: u64) -> Ulid {
        let rid = Ulid::new();
        self.catalog.register(rid, format!("bench {rid}"));
        let season = self
            .engine
            .create_season(
                rid,
                SeasonInput {
                    name: "bench".into(),
                    description: None,
                    from: epoch(),
                    to: nth_day(days - 1),
                    price: 100,
                    minimal_days: 1,
                },
            )
            .await
            .unwrap_or_else(|e| panic!("season failed: {e}"));
        let _ = self.engine.set_season_active(season.id, true).await;
        rid
    }
}

fn booking(rid: Ulid, from: NaiveDate, to: NaiveDate) -> BookingRequest {
    BookingRequest {
        items: vec![BookingItem {
            resource_id: rid,
            quantity: 1,
        }],
        from,
        to,
        customer: Customer {
            email: "bench@example.com".into(),
            ..Customer::default()
        },
        note: None,
    }
}

async fn phase1_sequential() {
    let bench = Bench::new("sequential");
    let n = 1000u64;
    let rid = bench.resource(n * 2).await;

    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        let _ = bench
            .engine
            .create_reservation(booking(rid, nth_day(i * 2), nth_day(i * 2)))
            .await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

async fn phase2_concurrent() {
    let bench = Bench::new("concurrent");
    let n_resources = 10;
    let n_per_resource = 200u64;
    let mut resources = Vec::new();
    for _ in 0..n_resources {
        resources.push(bench.resource(n_per_resource * 2).await);
    }

    let start = Instant::now();
    let jobs = resources
        .iter()
        .flat_map(|rid| (0..n_per_resource).map(move |i| (*rid, i)));
    let ok = stream::iter(jobs)
        .map(|(rid, i)| {
            let engine = bench.engine.clone();
            async move {
                engine
                    .create_reservation(booking(rid, nth_day(i * 2), nth_day(i * 2 + 1)))
                    .await
                    .is_ok()
            }
        })
        .buffer_unordered(64)
        .filter(|ok| futures::future::ready(*ok))
        .count()
        .await;

    let elapsed = start.elapsed();
    let total = n_resources as u64 * n_per_resource;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_resources} resources x {n_per_resource} bookings: {ok}/{total} committed in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contention() {
    let bench = Bench::new("contention");
    let rid = bench.resource(30).await;
    let n_tasks = 200;

    let start = Instant::now();
    let ok = stream::iter(0..n_tasks)
        .map(|i| {
            let engine = bench.engine.clone();
            async move {
                let first = nth_day(i % 10);
                engine
                    .create_reservation(booking(rid, first, nth_day(i % 10 + 2)))
                    .await
                    .is_ok()
            }
        })
        .buffer_unordered(n_tasks as usize)
        .filter(|ok| futures::future::ready(*ok))
        .count()
        .await;

    println!(
        "  {n_tasks} overlapping requests on one resource: {ok} committed in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    if let Ok(overview) = bench.engine.year_overview(rid, 2030).await {
        let reserved = overview
            .months
            .values()
            .flatten()
            .filter(|c| c.reserved)
            .count();
        println!("  reserved days: {reserved}");
    }
}

async fn phase4_read_under_load() {
    let bench = Bench::new("read_under_load");
    let readers_rid = bench.resource(365).await;
    for i in 0..50 {
        let _ = bench
            .engine
            .create_reservation(booking(readers_rid, nth_day(i * 7), nth_day(i * 7 + 1)))
            .await;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for _ in 0..4 {
        let writer_rid = bench.resource(3000).await;
        let engine = bench.engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) && i < 2900 {
                let _ = engine
                    .create_reservation(booking(writer_rid, nth_day(i), nth_day(i)))
                    .await;
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..8 {
        let engine = bench.engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(200);
            for _ in 0..200 {
                let t = Instant::now();
                let _ = engine.year_overview(readers_rid, 2030).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        if let Ok(latencies) = h.await {
            all.extend(latencies);
        }
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("year overview", &mut all);
}

async fn phase5_compaction() {
    let bench = Bench::new("compaction");
    let rid = bench.resource(400).await;
    for i in 0..300 {
        if let Ok(view) = bench
            .engine
            .create_reservation(booking(rid, nth_day(i), nth_day(i)))
            .await
            && i % 2 == 0
        {
            let _ = bench.engine.cancel_reservation(view.reservation.id).await;
        }
    }
    let appends = bench.engine.wal_appends_since_compact().await;
    let start = Instant::now();
    let result = bench.engine.compact_wal().await;
    println!(
        "  compacted {appends} appends in {:.2}ms ({})",
        start.elapsed().as_secs_f64() * 1000.0,
        if result.is_ok() { "ok" } else { "failed" }
    );
}

#[tokio::main]
async fn main() {
    println!("=== daybook stress benchmark ===\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent bookings across resources");
    phase2_concurrent().await;

    println!("\n[phase 3] contended bookings on one resource");
    phase3_contention().await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load().await;

    println!("\n[phase 5] WAL compaction");
    phase5_compaction().await;

    println!("\n=== done ===");
}
