use ulid::Ulid;

use crate::model::*;

use super::admission::validate_span;
use super::{Engine, EngineError};

fn reservation_info(r: &Reservation) -> ReservationInfo {
    ReservationInfo {
        id: r.id,
        room_id: r.room_id,
        requester: r.requester,
        start: r.span.start,
        end: r.span.end,
        purpose: r.purpose.clone(),
        status: r.status,
    }
}

impl Engine {
    pub async fn list_rooms(&self, now: Ms) -> Vec<RoomInfo> {
        let handles: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(handles.len());
        for rs in handles {
            let guard = rs.read().await;
            rooms.push(RoomInfo {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                status: guard.display_status(now),
            });
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub async fn room_info(&self, id: Ulid, now: Ms) -> Result<RoomInfo, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(RoomInfo {
            id: guard.id,
            name: guard.name.clone(),
            capacity: guard.capacity,
            status: guard.display_status(now),
        })
    }

    /// The committed reservations whose intervals intersect the query
    /// window, in start order. Empty means the window is free.
    pub async fn conflicts_with(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let span = validate_span(start, end)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .overlapping(&span)
            .filter_map(|b| guard.reservations.get(&b.reservation_id))
            .map(reservation_info)
            .collect())
    }

    /// The committed interval store for a room, in start order.
    pub async fn room_schedule(&self, room_id: Ulid) -> Result<Vec<BookedSpan>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.intervals.clone())
    }

    /// Every reservation ever filed against a room, any status.
    pub async fn room_reservations(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.values().map(reservation_info).collect())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room_id = self
            .room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .reservations
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_assets(&self) -> Vec<AssetInfo> {
        let handles: Vec<_> = self.assets.iter().map(|e| e.value().clone()).collect();
        let mut assets = Vec::with_capacity(handles.len());
        for st in handles {
            let guard = st.read().await;
            assets.push(AssetInfo {
                id: guard.id,
                name: guard.name.clone(),
                category: guard.category.clone(),
                status: guard.status,
            });
        }
        assets.sort_by_key(|a| a.id);
        assets
    }

    pub async fn asset_info(&self, id: Ulid) -> Result<AssetInfo, EngineError> {
        let st = self.get_asset(&id).ok_or(EngineError::NotFound(id))?;
        let guard = st.read().await;
        Ok(AssetInfo {
            id: guard.id,
            name: guard.name.clone(),
            category: guard.category.clone(),
            status: guard.status,
        })
    }

    pub async fn asset_tickets(&self, asset_id: Ulid) -> Result<Vec<RepairTicket>, EngineError> {
        let st = self.get_asset(&asset_id).ok_or(EngineError::NotFound(asset_id))?;
        let guard = st.read().await;
        Ok(guard.tickets.values().cloned().collect())
    }

    pub async fn get_ticket(&self, id: Ulid) -> Result<RepairTicket, EngineError> {
        if let Some(asset_id) = self.asset_for_ticket(&id) {
            let st = self
                .get_asset(&asset_id)
                .ok_or(EngineError::NotFound(asset_id))?;
            let guard = st.read().await;
            return guard.tickets.get(&id).cloned().ok_or(EngineError::NotFound(id));
        }
        let site = self.site_tickets.get(&id).map(|e| e.value().clone());
        if let Some(slot) = site {
            let guard = slot.read().await;
            return Ok(guard.clone());
        }
        Err(EngineError::NotFound(id))
    }

    /// The financial trail in creation order. Entries are append-only;
    /// corrections are compensating entries made elsewhere.
    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<_> = self.ledger.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }
}
