use crate::model::*;

use super::EngineError;
use super::estimate::HOUR_MS;

/// Turn a start time and an estimated duration into the ride window
/// `[start, start + hours)`. Rejects timestamps outside the valid range.
/// The range check on `start` runs first so the addition cannot overflow.
pub(crate) fn ride_window(start: Ms, duration_hours: u32) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start < MIN_VALID_TIMESTAMP_MS || start > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Invalid("start_time out of range"));
    }
    let end = start + Ms::from(duration_hours) * HOUR_MS;
    if end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Invalid("start_time out of range"));
    }
    Ok(Span::new(start, end))
}

/// Verify no stored booking overlaps the candidate window. The first hit
/// wins; its id is reported in the Conflict so callers can see what blocked
/// them. Caller holds the vehicle lock.
pub(crate) fn check_no_conflict(vs: &VehicleState, window: &Span) -> Result<(), EngineError> {
    if let Some(existing) = vs.overlapping(window).next() {
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}
