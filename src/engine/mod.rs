mod admission;
mod error;
mod lifecycle;
mod queries;

pub use error::EngineError;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedAssetState = Arc<RwLock<AssetState>>;

pub(super) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}

/// The reservation and lifecycle engine. Every room and every asset is
/// an independently locked unit; a transition validates its guards,
/// appends one event to the WAL and only then mutates in-memory state,
/// all under the owning entity's write lock.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) assets: DashMap<Ulid, SharedAssetState>,
    /// Location-targeted tickets — no linked asset, so no shared lock.
    pub(super) site_tickets: DashMap<Ulid, Arc<RwLock<RepairTicket>>>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    /// Reverse lookup: ticket id → asset id (asset-targeted tickets only).
    pub(super) ticket_to_asset: DashMap<Ulid, Ulid>,
    /// Append-only financial trail. Entries are inserted by
    /// `record_charge` and never touched again.
    pub(super) ledger: DashMap<Ulid, LedgerEntry>,
    wal: Mutex<Wal>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let engine = Self {
            rooms: DashMap::new(),
            assets: DashMap::new(),
            site_tickets: DashMap::new(),
            reservation_to_room: DashMap::new(),
            ticket_to_asset: DashMap::new(),
            ledger: DashMap::new(),
            wal: Mutex::new(Wal::open(&wal_path)?),
            notify,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated { id, name, capacity } => {
                    let rs = RoomState::new(*id, name.clone(), *capacity);
                    engine.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::AssetRegistered {
                    id,
                    name,
                    category,
                    registrar,
                    charge,
                    at,
                } => {
                    let st = AssetState::new(*id, name.clone(), category.clone());
                    engine.assets.insert(*id, Arc::new(RwLock::new(st)));
                    if let Some(c) = charge {
                        engine.record_charge(ChargeKind::Purchase, c, *registrar, *id, *at);
                    }
                }
                Event::TicketFiled { target: TicketTarget::Location(_), .. } => {
                    if let Some(ticket) = ticket_from_filed(event) {
                        engine
                            .site_tickets
                            .insert(ticket.id, Arc::new(RwLock::new(ticket)));
                    }
                }
                Event::TicketFiled { target: TicketTarget::Asset(asset_id), .. } => {
                    if let Some(entry) = engine.assets.get(asset_id) {
                        let st = entry.value().clone();
                        let mut guard = st.try_write().expect("replay: uncontended write");
                        engine.apply_asset_event(&mut guard, event);
                    }
                }
                Event::TicketAssigned { id, .. }
                | Event::TicketCompleted { id, .. }
                | Event::TicketCancelled { id, .. } => {
                    if let Some(asset_id) = engine.asset_for_ticket(id) {
                        if let Some(entry) = engine.assets.get(&asset_id) {
                            let st = entry.value().clone();
                            let mut guard = st.try_write().expect("replay: uncontended write");
                            engine.apply_asset_event(&mut guard, event);
                        }
                    } else if let Some(entry) = engine.site_tickets.get(id) {
                        let slot = entry.value().clone();
                        let mut guard = slot.try_write().expect("replay: uncontended write");
                        engine.apply_ticket_event(&mut guard, event);
                    }
                }
                Event::AssetScrapped { id, .. } => {
                    if let Some(entry) = engine.assets.get(id) {
                        let st = entry.value().clone();
                        let mut guard = st.try_write().expect("replay: uncontended write");
                        engine.apply_asset_event(&mut guard, event);
                    }
                }
                Event::RoomStatusSet { id, .. } | Event::BookingRequested { room_id: id, .. } => {
                    if let Some(entry) = engine.rooms.get(id) {
                        let rs = entry.value().clone();
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.apply_room_event(&mut guard, event);
                    }
                }
                Event::BookingApproved { id, .. }
                | Event::BookingRejected { id, .. }
                | Event::BookingCancelled { id, .. } => {
                    if let Some(room_id) = engine.room_for_reservation(id)
                        && let Some(entry) = engine.rooms.get(&room_id)
                    {
                        let rs = entry.value().clone();
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.apply_room_event(&mut guard, event);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL. No in-memory state may mutate before
    /// this returns Ok — a failure here aborts the whole operation.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let start = Instant::now();
        let mut wal = self.wal.lock().await;
        let result = wal
            .append(event)
            .map_err(|e| EngineError::WalError(e.to_string()));
        metrics::histogram!(crate::observability::WAL_APPEND_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        result
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_asset(&self, id: &Ulid) -> Option<SharedAssetState> {
        self.assets.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room
            .get(reservation_id)
            .map(|e| *e.value())
    }

    pub fn asset_for_ticket(&self, ticket_id: &Ulid) -> Option<Ulid> {
        self.ticket_to_asset.get(ticket_id).map(|e| *e.value())
    }

    /// Broadcast a committed transition to subscribers on `key`.
    pub(super) fn emit(&self, key: Ulid, transition: Transition) {
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL).increment(1);
        self.notify.send(key, &transition);
    }

    /// Append a ledger entry. Private to the engine: charges exist only
    /// as side effects of committed transition events, so every entry is
    /// traceable to exactly one WAL record.
    pub(super) fn record_charge(
        &self,
        kind: ChargeKind,
        charge: &Charge,
        operator: Ulid,
        subject: Ulid,
        at: Ms,
    ) {
        self.ledger.insert(
            charge.entry_id,
            LedgerEntry {
                id: charge.entry_id,
                kind,
                amount: charge.amount,
                operator,
                subject,
                at,
            },
        );
        metrics::counter!(crate::observability::LEDGER_ENTRIES_TOTAL).increment(1);
    }

    /// Apply a booking/room event to a RoomState (no locking — caller
    /// holds the lock). Used identically on the live path and on replay.
    pub(super) fn apply_room_event(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomStatusSet { status, .. } => {
                rs.status = *status;
            }
            Event::BookingRequested {
                id,
                room_id,
                requester,
                span,
                purpose,
                at,
            } => {
                rs.reservations.insert(
                    *id,
                    Reservation {
                        id: *id,
                        room_id: *room_id,
                        requester: *requester,
                        span: *span,
                        purpose: purpose.clone(),
                        status: ReservationStatus::Pending,
                        requested_at: *at,
                        decided_at: None,
                    },
                );
                self.reservation_to_room.insert(*id, *room_id);
            }
            Event::BookingApproved { id, at, .. } => {
                if let Some(r) = rs.reservations.get_mut(id) {
                    r.status = ReservationStatus::Approved;
                    r.decided_at = Some(*at);
                    let span = r.span;
                    rs.insert_interval(BookedSpan {
                        reservation_id: *id,
                        span,
                    });
                }
            }
            Event::BookingRejected { id, at, .. } => {
                if let Some(r) = rs.reservations.get_mut(id) {
                    r.status = ReservationStatus::Rejected;
                    r.decided_at = Some(*at);
                }
            }
            Event::BookingCancelled { id, at, .. } => {
                if let Some(r) = rs.reservations.get_mut(id) {
                    r.status = ReservationStatus::Cancelled;
                    r.decided_at = Some(*at);
                }
                rs.release_interval(*id);
            }
            // Asset and ticket events never reach a RoomState.
            _ => {}
        }
    }

    /// Apply a ticket/asset event to an AssetState (no locking — caller
    /// holds the lock). Runs the ticket field updates, then the
    /// cross-entity side effect on the asset's own status.
    pub(super) fn apply_asset_event(&self, state: &mut AssetState, event: &Event) {
        match event {
            Event::TicketFiled { .. } => {
                if let Some(ticket) = ticket_from_filed(event) {
                    self.ticket_to_asset.insert(ticket.id, state.id);
                    state.tickets.insert(ticket.id, ticket);
                }
            }
            Event::TicketAssigned { id, .. } => {
                if let Some(t) = state.tickets.get_mut(id) {
                    self.apply_ticket_event(t, event);
                }
                if state.status != AssetStatus::Scrapped {
                    state.status = AssetStatus::UnderRepair;
                }
            }
            Event::TicketCompleted { id, .. } | Event::TicketCancelled { id, .. } => {
                if let Some(t) = state.tickets.get_mut(id) {
                    self.apply_ticket_event(t, event);
                }
                // The asset returns to Normal only once no sibling ticket
                // remains open.
                if state.status == AssetStatus::UnderRepair && state.open_ticket().is_none() {
                    state.status = AssetStatus::Normal;
                }
            }
            Event::AssetScrapped { .. } => {
                state.status = AssetStatus::Scrapped;
            }
            _ => {}
        }
    }

    /// Apply a transition event to a single ticket's fields, recording
    /// the charge it carries, if any.
    pub(super) fn apply_ticket_event(&self, t: &mut RepairTicket, event: &Event) {
        match event {
            Event::TicketAssigned {
                maintainer,
                actor,
                charge,
                at,
                ..
            } => {
                t.status = TicketStatus::Processing;
                t.maintainer = Some(*maintainer);
                if let Some(c) = charge {
                    self.record_charge(ChargeKind::Maintenance, c, *actor, t.id, *at);
                }
            }
            Event::TicketCompleted {
                actor, charge, at, ..
            } => {
                t.status = TicketStatus::Completed;
                t.completed_at = Some(*at);
                if let Some(c) = charge {
                    self.record_charge(ChargeKind::Repair, c, *actor, t.id, *at);
                }
            }
            Event::TicketCancelled { .. } => {
                t.status = TicketStatus::Cancelled;
            }
            _ => {}
        }
    }
}

/// Build a Pending ticket from a TicketFiled event.
fn ticket_from_filed(event: &Event) -> Option<RepairTicket> {
    match event {
        Event::TicketFiled {
            id,
            target,
            submitter,
            at,
        } => Some(RepairTicket {
            id: *id,
            target: target.clone(),
            submitter: *submitter,
            status: TicketStatus::Pending,
            maintainer: None,
            submitted_at: *at,
            completed_at: None,
        }),
        _ => None,
    }
}
