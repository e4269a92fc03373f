use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Engine, EngineError};

/// Structural validation of a requested interval. Runs before a `Span`
/// is ever constructed so a malformed range is a typed error, not a
/// debug assertion.
pub(super) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(Span::new(start, end))
}

impl Engine {
    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            capacity,
        };
        self.wal_append(&event).await?;
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(id, name, capacity))));
        Ok(())
    }

    /// Available ⇄ Maintenance. Setting the status a room already has is
    /// not in the table and is rejected rather than silently absorbed.
    pub async fn set_room_status(
        &self,
        id: Ulid,
        status: RoomStatus,
        actor: Ulid,
    ) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if guard.status == status {
            return Err(EngineError::IllegalTransition {
                entity: EntityKind::Room,
                from: guard.status.as_str(),
                to: status.as_str(),
            });
        }
        let from = guard.status.as_str();
        let at = now_ms();

        let event = Event::RoomStatusSet { id, status, actor, at };
        self.wal_append(&event).await?;
        self.apply_room_event(&mut guard, &event);
        self.emit(
            id,
            Transition {
                entity: EntityKind::Room,
                entity_id: id,
                from,
                to: status.as_str(),
                at,
                actor: Some(actor),
            },
        );
        Ok(())
    }

    /// File a booking request. Structural validation only — the interval
    /// store is not consulted and not touched: a Pending reservation
    /// never blocks anyone, and the overlap check at approval time is
    /// the one that counts.
    pub async fn request_booking(
        &self,
        id: Ulid,
        room_id: Ulid,
        requester: Ulid,
        start: Ms,
        end: Ms,
        purpose: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let span = validate_span(start, end)?;
        if let Some(ref p) = purpose
            && p.len() > MAX_PURPOSE_LEN
        {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }
        if self.reservation_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.status == RoomStatus::Maintenance {
            return Err(EngineError::UnderMaintenance(room_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        let event = Event::BookingRequested {
            id,
            room_id,
            requester,
            span,
            purpose,
            at: now_ms(),
        };
        self.wal_append(&event).await?;
        self.apply_room_event(&mut guard, &event);
        Ok(guard
            .reservations
            .get(&id)
            .cloned()
            .expect("reservation just applied"))
    }

    /// The admission critical section. Under the room's write lock:
    /// re-check overlap against the committed set, and only on a clean
    /// check commit the interval and flip the reservation to Approved.
    /// On conflict the reservation stays Pending and the blocker's id is
    /// returned, so the caller can surface (or wait out) the blocker.
    pub async fn approve_booking(
        &self,
        id: Ulid,
        approver: Ulid,
    ) -> Result<Reservation, EngineError> {
        let rs = self.resolve_reservation(&id)?;
        let mut guard = rs.write().await;

        let res = guard
            .reservations
            .get(&id)
            .ok_or(EngineError::NotFound(id))?;
        if res.status != ReservationStatus::Pending {
            return Err(EngineError::IllegalTransition {
                entity: EntityKind::Reservation,
                from: res.status.as_str(),
                to: ReservationStatus::Approved.as_str(),
            });
        }
        let span = res.span;

        if let Some(blocker) = guard.overlapping(&span).next() {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(blocker.reservation_id));
        }

        let at = now_ms();
        let event = Event::BookingApproved { id, approver, at };
        self.wal_append(&event).await?;
        self.apply_room_event(&mut guard, &event);
        metrics::counter!(crate::observability::BOOKINGS_ADMITTED_TOTAL).increment(1);
        self.emit(
            guard.id,
            Transition {
                entity: EntityKind::Reservation,
                entity_id: id,
                from: ReservationStatus::Pending.as_str(),
                to: ReservationStatus::Approved.as_str(),
                at,
                actor: Some(approver),
            },
        );
        Ok(guard
            .reservations
            .get(&id)
            .cloned()
            .expect("reservation just applied"))
    }

    pub async fn reject_booking(
        &self,
        id: Ulid,
        approver: Ulid,
    ) -> Result<Reservation, EngineError> {
        let rs = self.resolve_reservation(&id)?;
        let mut guard = rs.write().await;

        let res = guard
            .reservations
            .get(&id)
            .ok_or(EngineError::NotFound(id))?;
        if res.status != ReservationStatus::Pending {
            return Err(EngineError::IllegalTransition {
                entity: EntityKind::Reservation,
                from: res.status.as_str(),
                to: ReservationStatus::Rejected.as_str(),
            });
        }

        let at = now_ms();
        let event = Event::BookingRejected { id, approver, at };
        self.wal_append(&event).await?;
        self.apply_room_event(&mut guard, &event);
        self.emit(
            guard.id,
            Transition {
                entity: EntityKind::Reservation,
                entity_id: id,
                from: ReservationStatus::Pending.as_str(),
                to: ReservationStatus::Rejected.as_str(),
                at,
                actor: Some(approver),
            },
        );
        Ok(guard
            .reservations
            .get(&id)
            .cloned()
            .expect("reservation just applied"))
    }

    /// Cancel an Approved booking and release its interval. The slot
    /// becomes bookable again the moment this returns.
    pub async fn cancel_booking(&self, id: Ulid, actor: Ulid) -> Result<Reservation, EngineError> {
        let rs = self.resolve_reservation(&id)?;
        let mut guard = rs.write().await;

        let res = guard
            .reservations
            .get(&id)
            .ok_or(EngineError::NotFound(id))?;
        if res.status != ReservationStatus::Approved {
            return Err(EngineError::IllegalTransition {
                entity: EntityKind::Reservation,
                from: res.status.as_str(),
                to: ReservationStatus::Cancelled.as_str(),
            });
        }

        let at = now_ms();
        let event = Event::BookingCancelled { id, actor, at };
        self.wal_append(&event).await?;
        self.apply_room_event(&mut guard, &event);
        self.emit(
            guard.id,
            Transition {
                entity: EntityKind::Reservation,
                entity_id: id,
                from: ReservationStatus::Approved.as_str(),
                to: ReservationStatus::Cancelled.as_str(),
                at,
                actor: Some(actor),
            },
        );
        Ok(guard
            .reservations
            .get(&id)
            .cloned()
            .expect("reservation just applied"))
    }

    fn resolve_reservation(&self, id: &Ulid) -> Result<super::SharedRoomState, EngineError> {
        let room_id = self
            .room_for_reservation(id)
            .ok_or(EngineError::NotFound(*id))?;
        self.get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))
    }
}
