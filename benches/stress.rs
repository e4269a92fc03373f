use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use custos::engine::Engine;
use custos::model::Ms;
use custos::notify::NotifyHub;

const HOUR: Ms = 3_600_000;

fn fresh_engine(label: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("custos_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let wal = dir.join(format!("{label}.wal"));
    let notify = Arc::new(NotifyHub::new());
    Arc::new(Engine::new(wal, notify).expect("engine init"))
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Phase 1: sequential request+approve on one room, disjoint slots.
async fn phase1_sequential(n: usize) {
    let engine = fresh_engine("sequential");
    let room = Ulid::new();
    engine.create_room(room, "bench".into(), 100).await.unwrap();

    let mut latencies = Vec::with_capacity(n);
    for i in 0..n as Ms {
        let id = Ulid::new();
        let start = Instant::now();
        engine
            .request_booking(id, room, Ulid::new(), i * HOUR, (i + 1) * HOUR, None)
            .await
            .unwrap();
        engine.approve_booking(id, Ulid::new()).await.unwrap();
        latencies.push(start.elapsed());
    }
    print_latency("sequential request+approve", &mut latencies);
}

/// Phase 2: independent rooms approved concurrently — no lock contention.
async fn phase2_parallel_rooms(rooms: usize, per_room: usize) {
    let engine = fresh_engine("parallel");

    let mut handles = Vec::new();
    let started = Instant::now();
    for _ in 0..rooms {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let room = Ulid::new();
            eng.create_room(room, "bench".into(), 100).await.unwrap();
            for i in 0..per_room as Ms {
                let id = Ulid::new();
                eng.request_booking(id, room, Ulid::new(), i * HOUR, (i + 1) * HOUR, None)
                    .await
                    .unwrap();
                eng.approve_booking(id, Ulid::new()).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    let elapsed = started.elapsed();
    let total = rooms * per_room;
    println!(
        "  parallel rooms: {total} bookings across {rooms} rooms in {:.2}s ({:.0}/s)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64(),
    );
}

/// Phase 3: every task wants the same slot in the same room. Exactly one
/// admission must win; the rest must lose cleanly with a conflict.
async fn phase3_contention(contenders: usize) {
    let engine = fresh_engine("contention");
    let room = Ulid::new();
    engine.create_room(room, "bench".into(), 100).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..contenders {
        let id = Ulid::new();
        engine
            .request_booking(id, room, Ulid::new(), 9 * HOUR, 17 * HOUR, None)
            .await
            .unwrap();
        ids.push(id);
    }

    let mut handles = Vec::new();
    for id in ids {
        let eng = engine.clone();
        handles.push(tokio::spawn(
            async move { eng.approve_booking(id, Ulid::new()).await },
        ));
    }

    let mut admitted = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(_) => conflicts += 1,
        }
    }
    println!("  contention: {contenders} contenders -> {admitted} admitted, {conflicts} conflicts");
    assert_eq!(admitted, 1);
}

#[tokio::main]
async fn main() {
    println!("custos stress:");
    phase1_sequential(2_000).await;
    phase2_parallel_rooms(8, 500).await;
    phase3_contention(64).await;
}
