use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, ride_window};
use super::estimate::estimated_ride_duration_hours;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_vehicle(
        &self,
        id: Ulid,
        name: String,
        capacity_kg: f64,
        tyres: u32,
    ) -> Result<VehicleInfo, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("vehicle name too long"));
        }
        if !capacity_kg.is_finite() || capacity_kg <= 0.0 {
            return Err(EngineError::Invalid("capacity_kg must be positive"));
        }
        if tyres < 2 {
            return Err(EngineError::Invalid("tyres must be at least 2"));
        }
        if self.state.len() >= MAX_VEHICLES_PER_FLEET {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let name = name.trim().to_string();
        let event = Event::VehicleRegistered {
            id,
            name: name.clone(),
            capacity_kg,
            tyres,
        };
        self.wal_append(&event).await?;
        let vs = VehicleState::new(id, name, capacity_kg, tyres);
        let info = VehicleInfo::from(&vs);
        self.state.insert(id, Arc::new(RwLock::new(vs)));
        Ok(info)
    }

    /// Admit a booking. The conflict re-check and the insert run under the
    /// vehicle's write lock, so of N concurrent overlapping attempts on one
    /// vehicle exactly one commits; the rest get Conflict. Attempts on other
    /// vehicles are not blocked.
    pub async fn create_booking(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        customer_id: String,
        from_pincode: String,
        to_pincode: String,
        start_time: Ms,
    ) -> Result<BookingInfo, EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;

        if customer_id.trim().is_empty() {
            return Err(EngineError::Invalid("customer_id must not be empty"));
        }
        if customer_id.len() > MAX_CUSTOMER_ID_LEN {
            return Err(EngineError::LimitExceeded("customer_id too long"));
        }
        if from_pincode.len() > MAX_PINCODE_LEN || to_pincode.len() > MAX_PINCODE_LEN {
            return Err(EngineError::LimitExceeded("pincode too long"));
        }
        let customer_id = customer_id.trim().to_string();
        let from_pincode = from_pincode.trim().to_string();
        let to_pincode = to_pincode.trim().to_string();

        let duration_hours = estimated_ride_duration_hours(&from_pincode, &to_pincode);
        let window = ride_window(start_time, duration_hours)?;

        let mut guard = vs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }

        if let Err(e) = check_no_conflict(&guard, &window) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::BookingCommitted {
            id,
            vehicle_id,
            customer_id: customer_id.clone(),
            from_pincode: from_pincode.clone(),
            to_pincode: to_pincode.clone(),
            span: window,
            duration_hours,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_COMMITTED_TOTAL).increment(1);

        Ok(BookingInfo {
            id,
            vehicle_id,
            customer_id,
            from_pincode,
            to_pincode,
            start: window.start,
            end: window.end,
            duration_hours,
        })
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one registration per vehicle followed by
    /// its live bookings.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let vehicle_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in vehicle_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let vs = entry.value().clone();
            let guard = vs.read().await;

            events.push(Event::VehicleRegistered {
                id: guard.id,
                name: guard.name.clone(),
                capacity_kg: guard.capacity_kg,
                tyres: guard.tyres,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCommitted {
                    id: booking.id,
                    vehicle_id: guard.id,
                    customer_id: booking.customer_id.clone(),
                    from_pincode: booking.from_pincode.clone(),
                    to_pincode: booking.to_pincode.clone(),
                    span: booking.span,
                    duration_hours: booking.duration_hours,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
