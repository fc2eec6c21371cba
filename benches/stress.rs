use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("fleetlink")
        .password("fleetlink");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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

async fn register_vehicle(client: &tokio_postgres::Client, name: &str, capacity: i64) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, name, capacity_kg, tyres) VALUES ('{id}', '{name}', {capacity}, 6)"
        ))
        .await
        .unwrap();
    id
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let vid = register_vehicle(&client, "seq-truck", 2000).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    // Disjoint hourly windows on the same pincode pair (1-hour route)
    for i in 0..n {
        let bid = Ulid::new();
        let s = (i as i64) * 2 * HOUR;
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
                 VALUES ('{bid}', '{vid}', 'bench', '400001', '400002', {s})"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  {n} sequential bookings in {:.2}s ({:.0} bookings/s)",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("booking insert", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    // One connection per vehicle, all in one shared fleet; bookings on
    // different vehicles must not block each other.
    let n_vehicles = 10;
    let bookings_per_vehicle = 200;
    let db = format!("bench_shared_{}", Ulid::new());

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_vehicles {
        let host = host.to_string();
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let mut config = Config::new();
            config
                .host(host)
                .port(port)
                .dbname(db)
                .user("fleetlink")
                .password("fleetlink");
            let (client, conn) = config.connect(NoTls).await.expect("connect failed");
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let vid = register_vehicle(&client, &format!("truck-{i}"), 2000).await;

            let mut latencies = Vec::with_capacity(bookings_per_vehicle);
            for i in 0..bookings_per_vehicle {
                let bid = Ulid::new();
                let s = (i as i64) * 2 * HOUR;
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
                         VALUES ('{bid}', '{vid}', 'bench', '400001', '400002', {s})"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let total = n_vehicles * bookings_per_vehicle;
    println!(
        "  {total} bookings across {n_vehicles} vehicles in {:.2}s ({:.0} bookings/s)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    print_latency("concurrent booking insert", &mut all_latencies);
}

async fn phase3_search_under_load(host: &str, port: u16) {
    let client = connect(host, port).await;
    let vid = register_vehicle(&client, "read-truck", 2000).await;

    // Seed bookings
    for i in 0..500i64 {
        let bid = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
                 VALUES ('{bid}', '{vid}', 'bench', '400001', '400002', {})",
                i * 2 * HOUR
            ))
            .await
            .unwrap();
    }

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let s = (i as i64) * HOUR;
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "SELECT * FROM availability WHERE capacity_required = 600 AND from_pincode = '400001' \
                 AND to_pincode = '400002' AND start_time = {s}"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("availability query", &mut latencies);
}

async fn phase4_conflict_storm(host: &str, port: u16) {
    // Many connections race for the same window on one vehicle: exactly one
    // booking must win.
    let n_conns = 50;
    let vid = Ulid::new();

    // All racers join the same fleet via a fixed dbname
    let db = format!("storm_{}", Ulid::new());
    let mk = |host: String, db: String| async move {
        let mut config = Config::new();
        config
            .host(host)
            .port(port)
            .dbname(db)
            .user("fleetlink")
            .password("fleetlink");
        let (client, conn) = config.connect(NoTls).await.expect("connect failed");
        tokio::spawn(async move {
            let _ = conn.await;
        });
        client
    };

    let seed = mk(host.to_string(), db.clone()).await;
    seed.batch_execute(&format!(
        "INSERT INTO vehicles (id, name, capacity_kg, tyres) VALUES ('{vid}', 'contended', 2000, 6)"
    ))
    .await
    .unwrap();

    let start = Instant::now();
    let committed = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let conflicted = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..n_conns {
        let host = host.to_string();
        let db = db.clone();
        let committed = committed.clone();
        let conflicted = conflicted.clone();
        handles.push(tokio::spawn(async move {
            let client = mk(host, db).await;
            let bid = Ulid::new();
            let result = client
                .batch_execute(&format!(
                    "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
                     VALUES ('{bid}', '{vid}', 'racer', '400001', '400004', 0)"
                ))
                .await;
            match result {
                Ok(()) => committed.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                Err(_) => conflicted.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            };
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = committed.load(std::sync::atomic::Ordering::Relaxed);
    let lost = conflicted.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} racers on one window: {ok} committed, {lost} conflicted in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(ok, 1, "exactly one overlapping booking must commit");
}

#[tokio::main]
async fn main() {
    let host = std::env::var("FLEETLINK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("FLEETLINK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid FLEETLINK_PORT");

    println!("=== fleetlink stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own fleet (unique dbname) to avoid interference

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent bookings across vehicles");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] availability search with stored bookings");
    phase3_search_under_load(&host, port).await;

    println!("\n[phase 4] conflict storm on one vehicle");
    phase4_conflict_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
