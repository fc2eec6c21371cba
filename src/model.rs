use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
///
/// `start == end` is legal: a zero-length ride window occupies no instant,
/// but the overlap predicate below is still applied to it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// The conflict predicate shared by the query and admission paths.
    /// Touching intervals (`self.end == other.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// A committed reservation on a vehicle. Immutable once stored; there is
/// no cancellation workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: String,
    pub from_pincode: String,
    pub to_pincode: String,
    pub span: Span,
    /// Derived from the pincodes, stored redundantly for display.
    pub duration_hours: u32,
}

/// One vehicle and everything booked on it.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub name: String,
    /// Cargo capacity in kilograms. Strictly positive.
    pub capacity_kg: f64,
    pub tyres: u32,
    /// All bookings, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl VehicleState {
    pub fn new(id: Ulid, name: String, capacity_kg: f64, tyres: u32) -> Self {
        Self {
            id,
            name,
            capacity_kg,
            tyres,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    VehicleRegistered {
        id: Ulid,
        name: String,
        capacity_kg: f64,
        tyres: u32,
    },
    BookingCommitted {
        id: Ulid,
        vehicle_id: Ulid,
        customer_id: String,
        from_pincode: String,
        to_pincode: String,
        span: Span,
        duration_hours: u32,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity_kg: f64,
    pub tyres: u32,
}

impl From<&VehicleState> for VehicleInfo {
    fn from(vs: &VehicleState) -> Self {
        Self {
            id: vs.id,
            name: vs.name.clone(),
            capacity_kg: vs.capacity_kg,
            tyres: vs.tyres,
        }
    }
}

/// A search hit: the vehicle plus the duration the searched route implies.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailableVehicle {
    pub vehicle: VehicleInfo,
    pub estimated_ride_duration_hours: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub customer_id: String,
    pub from_pincode: String,
    pub to_pincode: String,
    pub start: Ms,
    pub end: Ms,
    pub duration_hours: u32,
}
