use ulid::Ulid;

use crate::model::*;

use super::conflict::ride_window;
use super::estimate::estimated_ride_duration_hours;
use super::{Engine, EngineError};

impl Engine {
    /// Snapshot of vehicle ids sorted by ULID. ULIDs lead with a creation
    /// timestamp, so this is stable and roughly registration-ordered without
    /// a second index.
    fn vehicle_ids_sorted(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub async fn list_vehicles(&self) -> Vec<VehicleInfo> {
        let mut out = Vec::new();
        for id in self.vehicle_ids_sorted() {
            if let Some(vs) = self.get_vehicle(&id) {
                let guard = vs.read().await;
                out.push(VehicleInfo::from(&*guard));
            }
        }
        out
    }

    pub async fn vehicles_with_capacity(&self, min_capacity_kg: f64) -> Vec<VehicleInfo> {
        let mut out = Vec::new();
        for id in self.vehicle_ids_sorted() {
            if let Some(vs) = self.get_vehicle(&id) {
                let guard = vs.read().await;
                if guard.capacity_kg >= min_capacity_kg {
                    out.push(VehicleInfo::from(&*guard));
                }
            }
        }
        out
    }

    /// Search for vehicles that can carry `capacity_required` kg and have no
    /// booking overlapping the ride window implied by the route and start
    /// time. This is a lock-free advisory snapshot: a vehicle returned here
    /// can still lose a subsequent booking race, in which case that booking
    /// attempt gets Conflict.
    pub async fn find_available(
        &self,
        capacity_required: f64,
        from_pincode: &str,
        to_pincode: &str,
        start_time: Ms,
    ) -> Result<Vec<AvailableVehicle>, EngineError> {
        if !capacity_required.is_finite() || capacity_required <= 0.0 {
            return Err(EngineError::Invalid("capacity_required must be positive"));
        }
        let duration_hours = estimated_ride_duration_hours(from_pincode, to_pincode);
        let window = ride_window(start_time, duration_hours)?;

        let mut out = Vec::new();
        for id in self.vehicle_ids_sorted() {
            let Some(vs) = self.get_vehicle(&id) else {
                continue;
            };
            let guard = vs.read().await;
            if guard.capacity_kg < capacity_required {
                continue;
            }
            if guard.overlapping(&window).next().is_some() {
                continue;
            }
            out.push(AvailableVehicle {
                vehicle: VehicleInfo::from(&*guard),
                estimated_ride_duration_hours: duration_hours,
            });
        }
        Ok(out)
    }

    pub async fn bookings_for_vehicle(
        &self,
        vehicle_id: Ulid,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(guard
            .bookings
            .iter()
            .map(|b| booking_info(vehicle_id, b))
            .collect())
    }

    /// Every booking in the fleet, grouped by vehicle in id order.
    pub async fn list_bookings(&self) -> Vec<BookingInfo> {
        let mut out = Vec::new();
        for id in self.vehicle_ids_sorted() {
            if let Some(vs) = self.get_vehicle(&id) {
                let guard = vs.read().await;
                out.extend(guard.bookings.iter().map(|b| booking_info(id, b)));
            }
        }
        out
    }

    pub async fn vehicle_info(&self, id: Ulid) -> Result<VehicleInfo, EngineError> {
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let guard = vs.read().await;
        Ok(VehicleInfo::from(&*guard))
    }
}

fn booking_info(vehicle_id: Ulid, b: &Booking) -> BookingInfo {
    BookingInfo {
        id: b.id,
        vehicle_id,
        customer_id: b.customer_id.clone(),
        from_pincode: b.from_pincode.clone(),
        to_pincode: b.to_pincode.clone(),
        start: b.span.start,
        end: b.span.end,
        duration_hours: b.duration_hours,
    }
}
