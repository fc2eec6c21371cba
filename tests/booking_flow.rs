use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use fleetlink::fleet::FleetManager;
use fleetlink::wire;

const H: i64 = 3_600_000; // 1 hour in ms

/// 2023-12-01T00:00:00Z
const DAY: i64 = 1_701_388_800_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<FleetManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("fleetlink_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let fleets = Arc::new(FleetManager::new(dir, 1000));

    let fm = fleets.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let fm = fm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, fm, "fleetlink".to_string(), None).await;
            });
        }
    });

    (addr, fleets)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(format!("test_{}", Ulid::new()))
        .user("fleetlink")
        .password("fleetlink");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn register_vehicle(
    client: &tokio_postgres::Client,
    name: &str,
    capacity_kg: f64,
    tyres: u32,
) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, name, capacity_kg, tyres) VALUES ('{id}', '{name}', {capacity_kg}, {tyres})"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn register_search_book_flow() {
    let (addr, _fleets) = start_test_server().await;
    let client = connect(addr).await;

    let vid = register_vehicle(&client, "Truck A", 1500.0, 6).await;

    // Search 400001 → 400002 at 10:00 — the vehicle is free, duration 1h
    let search = format!(
        "SELECT * FROM availability WHERE capacity_required = 600 AND from_pincode = '400001' \
         AND to_pincode = '400002' AND start_time = {}",
        DAY + 10 * H
    );
    let hits = data_rows(client.simple_query(&search).await.unwrap());
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].get("id").unwrap(), vid.to_string());
    assert_eq!(hits[0].get("estimated_ride_duration_hours").unwrap(), "1");

    // Book it 09:00–12:00 (3-hour route)
    let bid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
             VALUES ('{bid}', '{vid}', 'cust-1', '400001', '400004', {})",
            DAY + 9 * H
        ))
        .await
        .unwrap();

    // The same search window now collides with the booking
    let hits = data_rows(client.simple_query(&search).await.unwrap());
    assert!(hits.is_empty());

    // The booking is listed for the vehicle with derived fields
    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM bookings WHERE vehicle_id = '{vid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id").unwrap(), bid.to_string());
    assert_eq!(rows[0].get("customer_id").unwrap(), "cust-1");
    assert_eq!(rows[0].get("start_time").unwrap(), (DAY + 9 * H).to_string());
    assert_eq!(rows[0].get("end_time").unwrap(), (DAY + 12 * H).to_string());
    assert_eq!(rows[0].get("estimated_ride_duration_hours").unwrap(), "3");
}

#[tokio::test]
async fn conflicting_booking_reports_conflict_sqlstate() {
    let (addr, _fleets) = start_test_server().await;
    let client = connect(addr).await;

    let vid = register_vehicle(&client, "Truck A", 1500.0, 6).await;

    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
             VALUES ('{}', '{vid}', 'cust-1', '400001', '400004', {})",
            Ulid::new(),
            DAY + 9 * H
        ))
        .await
        .unwrap();

    // 10:00 with a 3-hour route lands inside 09:00–12:00
    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
             VALUES ('{}', '{vid}', 'cust-2', '400001', '400004', {})",
            Ulid::new(),
            DAY + 10 * H
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code().unwrap().code(), "23P01");

    // Back-to-back at 12:00 is fine
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
             VALUES ('{}', '{vid}', 'cust-3', '400001', '400004', {})",
            Ulid::new(),
            DAY + 12 * H
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn error_kinds_have_distinct_sqlstates() {
    let (addr, _fleets) = start_test_server().await;
    let client = connect(addr).await;

    // Validation: non-positive capacity
    let err = client
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, name, capacity_kg, tyres) VALUES ('{}', 'Bad', 0, 4)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code().unwrap().code(), "22023");

    // Not found: booking a vehicle that was never registered
    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
             VALUES ('{}', '{}', 'cust-1', '400001', '400004', {DAY})",
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code().unwrap().code(), "P0002");

    // Duplicate registration
    let vid = register_vehicle(&client, "Truck A", 1500.0, 6).await;
    let err = client
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, name, capacity_kg, tyres) VALUES ('{vid}', 'Truck A', 1500, 6)"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code().unwrap().code(), "42710");

    // Boundary rejection: malformed SQL value
    let err = client
        .batch_execute("INSERT INTO vehicles (id, name, capacity_kg, tyres) VALUES ('nope', 'A', 1, 2)")
        .await
        .unwrap_err();
    assert_eq!(err.code().unwrap().code(), "42601");
}

#[tokio::test]
async fn booking_returning_yields_committed_row() {
    let (addr, _fleets) = start_test_server().await;
    let client = connect(addr).await;

    let vid = register_vehicle(&client, "Truck A", 1500.0, 6).await;

    let bid = Ulid::new();
    let rows = data_rows(
        client
            .simple_query(&format!(
                "INSERT INTO bookings (id, vehicle_id, customer_id, from_pincode, to_pincode, start_time) \
                 VALUES ('{bid}', '{vid}', 'cust-9', '400001', '400005', {}) RETURNING *",
                DAY + 9 * H
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id").unwrap(), bid.to_string());
    assert_eq!(rows[0].get("vehicle_id").unwrap(), vid.to_string());
    assert_eq!(rows[0].get("estimated_ride_duration_hours").unwrap(), "4");
    assert_eq!(rows[0].get("end_time").unwrap(), (DAY + 13 * H).to_string());
}

#[tokio::test]
async fn vehicles_capacity_filter() {
    let (addr, _fleets) = start_test_server().await;
    let client = connect(addr).await;

    register_vehicle(&client, "Small Van", 400.0, 4).await;
    let big = register_vehicle(&client, "Big Truck", 1500.0, 6).await;

    let all = data_rows(client.simple_query("SELECT * FROM vehicles").await.unwrap());
    assert_eq!(all.len(), 2);

    let heavy = data_rows(
        client
            .simple_query("SELECT * FROM vehicles WHERE capacity_kg >= 600")
            .await
            .unwrap(),
    );
    assert_eq!(heavy.len(), 1);
    assert_eq!(heavy[0].get("id").unwrap(), big.to_string());
    assert_eq!(heavy[0].get("name").unwrap(), "Big Truck");
}

#[tokio::test]
async fn fleets_are_isolated_per_database() {
    let (addr, _fleets) = start_test_server().await;
    let client_a = connect(addr).await;
    let client_b = connect(addr).await;

    register_vehicle(&client_a, "Only in A", 1000.0, 4).await;

    let in_a = data_rows(client_a.simple_query("SELECT * FROM vehicles").await.unwrap());
    let in_b = data_rows(client_b.simple_query("SELECT * FROM vehicles").await.unwrap());
    assert_eq!(in_a.len(), 1);
    assert!(in_b.is_empty());
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let (addr, _fleets) = start_test_server().await;
    let client = connect(addr).await;

    let vid = register_vehicle(&client, "Truck A", 1500.0, 6).await;

    // tokio-postgres uses the extended protocol for `query`; all parameters
    // travel as text and are substituted server-side.
    let rows = client
        .query(
            "SELECT * FROM bookings WHERE vehicle_id = $1",
            &[&vid.to_string()],
        )
        .await
        .unwrap();
    assert!(rows.is_empty());
}
