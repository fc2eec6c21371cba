//! Hard limits. Everything a client could grow without bound is capped here.

/// Max vehicles registered in one fleet.
pub const MAX_VEHICLES_PER_FLEET: usize = 10_000;

/// Max bookings stored on a single vehicle.
pub const MAX_BOOKINGS_PER_VEHICLE: usize = 100_000;

/// Max bytes for a vehicle name.
pub const MAX_NAME_LEN: usize = 256;

/// Max bytes for a customer id.
pub const MAX_CUSTOMER_ID_LEN: usize = 256;

/// Max bytes for a pincode. Real pincodes are 6 digits; anything longer
/// than this is garbage input, not a route.
pub const MAX_PINCODE_LEN: usize = 32;

/// Timestamps must be non-negative epoch milliseconds.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 0;

/// 2100-01-01T00:00:00Z in epoch milliseconds.
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;

/// Max independent fleets (pgwire databases) per process.
pub const MAX_FLEETS: usize = 1024;

/// Max bytes for a fleet (database) name.
pub const MAX_FLEET_NAME_LEN: usize = 256;
