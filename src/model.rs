use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Money in integer cents — the only amount type.
pub type Cents = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Statuses ─────────────────────────────────────────────────────

/// Authoritative room status. `Booked` is never stored — it is derived
/// from the committed interval set (see `RoomState::display_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Maintenance => "maintenance",
        }
    }
}

/// What a room looks like to a caller at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Available,
    Maintenance,
    Booked,
}

impl DisplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayStatus::Available => "available",
            DisplayStatus::Maintenance => "maintenance",
            DisplayStatus::Booked => "booked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetStatus {
    Normal,
    UnderRepair,
    /// Terminal.
    Scrapped,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Normal => "normal",
            AssetStatus::UnderRepair => "under_repair",
            AssetStatus::Scrapped => "scrapped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Pending,
    Processing,
    /// Terminal.
    Completed,
    /// Terminal.
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Processing => "processing",
            TicketStatus::Completed => "completed",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    /// Open tickets block asset scrapping and keep the asset under repair.
    pub fn is_open(&self) -> bool {
        matches!(self, TicketStatus::Pending | TicketStatus::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    /// Terminal.
    Rejected,
    /// Terminal.
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

/// What a repair ticket is filed against: a tracked asset, or a
/// free-form location (a leaking classroom ceiling has no asset id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketTarget {
    Asset(Ulid),
    Location(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub requester: Ulid,
    pub span: Span,
    pub purpose: Option<String>,
    pub status: ReservationStatus,
    pub requested_at: Ms,
    /// Set once, on approve/reject/cancel.
    pub decided_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairTicket {
    pub id: Ulid,
    pub target: TicketTarget,
    pub submitter: Ulid,
    pub status: TicketStatus,
    pub maintainer: Option<Ulid>,
    /// Stamped at filing, immutable.
    pub submitted_at: Ms,
    /// Stamped exactly once, on the transition into `Completed`.
    pub completed_at: Option<Ms>,
}

impl RepairTicket {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// One committed (Approved) interval in a room's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedSpan {
    pub reservation_id: Ulid,
    pub span: Span,
}

/// A room and everything serialized under its lock: the committed
/// interval store plus every reservation ever filed against it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub status: RoomStatus,
    /// Approved intervals only, sorted by `span.start`.
    pub intervals: Vec<BookedSpan>,
    pub reservations: BTreeMap<Ulid, Reservation>,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, capacity: u32) -> Self {
        Self {
            id,
            name,
            capacity,
            status: RoomStatus::Available,
            intervals: Vec::new(),
            reservations: BTreeMap::new(),
        }
    }

    /// Insert a committed interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, booked: BookedSpan) {
        let pos = self
            .intervals
            .binary_search_by_key(&booked.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, booked);
    }

    /// Release a committed interval by reservation id.
    pub fn release_interval(&mut self, reservation_id: Ulid) -> Option<BookedSpan> {
        if let Some(pos) = self
            .intervals
            .iter()
            .position(|b| b.reservation_id == reservation_id)
        {
            Some(self.intervals.remove(pos))
        } else {
            None
        }
    }

    /// Committed intervals whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &BookedSpan> {
        let right_bound = self
            .intervals
            .partition_point(|b| b.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Derived status for callers: Maintenance if set, otherwise Booked
    /// while a committed interval covers `now`, otherwise Available.
    pub fn display_status(&self, now: Ms) -> DisplayStatus {
        if self.status == RoomStatus::Maintenance {
            return DisplayStatus::Maintenance;
        }
        let probe = Span::new(now, now + 1);
        if self.overlapping(&probe).next().is_some() {
            DisplayStatus::Booked
        } else {
            DisplayStatus::Available
        }
    }
}

/// An asset and the repair tickets that target it. Keeping the tickets
/// inside the asset state means one lock covers guard evaluation, the
/// sibling-ticket check and the status flip.
#[derive(Debug, Clone)]
pub struct AssetState {
    pub id: Ulid,
    pub name: String,
    pub category: String,
    pub status: AssetStatus,
    pub tickets: BTreeMap<Ulid, RepairTicket>,
}

impl AssetState {
    pub fn new(id: Ulid, name: String, category: String) -> Self {
        Self {
            id,
            name,
            category,
            status: AssetStatus::Normal,
            tickets: BTreeMap::new(),
        }
    }

    /// First open ticket, if any — the blocker reported by scrap guards.
    pub fn open_ticket(&self) -> Option<&RepairTicket> {
        self.tickets.values().find(|t| t.is_open())
    }
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeKind {
    /// Asset registration with a purchase price.
    Purchase,
    /// Maintenance fee incurred when a ticket is assigned.
    Maintenance,
    /// Repair cost incurred when a ticket is completed.
    Repair,
}

impl ChargeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeKind::Purchase => "purchase",
            ChargeKind::Maintenance => "maintenance",
            ChargeKind::Repair => "repair",
        }
    }
}

/// Billable amount carried inside a transition event. The entry id is
/// fixed at commit time so replay rebuilds the identical ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub entry_id: Ulid,
    pub amount: Cents,
}

/// Immutable financial record. Created only from within a transition;
/// the engine has no update or delete for these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Ulid,
    pub kind: ChargeKind,
    pub amount: Cents,
    pub operator: Ulid,
    /// The asset or ticket whose transition produced this entry.
    pub subject: Ulid,
    pub at: Ms,
}

// ── Events ───────────────────────────────────────────────────────

/// One record per committed transition — the WAL format. In-memory
/// state is a pure function of the event sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    RoomStatusSet {
        id: Ulid,
        status: RoomStatus,
        actor: Ulid,
        at: Ms,
    },
    AssetRegistered {
        id: Ulid,
        name: String,
        category: String,
        registrar: Ulid,
        charge: Option<Charge>,
        at: Ms,
    },
    AssetScrapped {
        id: Ulid,
        actor: Ulid,
        at: Ms,
    },
    TicketFiled {
        id: Ulid,
        target: TicketTarget,
        submitter: Ulid,
        at: Ms,
    },
    TicketAssigned {
        id: Ulid,
        maintainer: Ulid,
        actor: Ulid,
        charge: Option<Charge>,
        at: Ms,
    },
    TicketCompleted {
        id: Ulid,
        actor: Ulid,
        charge: Option<Charge>,
        at: Ms,
    },
    TicketCancelled {
        id: Ulid,
        actor: Ulid,
        at: Ms,
    },
    BookingRequested {
        id: Ulid,
        room_id: Ulid,
        requester: Ulid,
        span: Span,
        purpose: Option<String>,
        at: Ms,
    },
    BookingApproved {
        id: Ulid,
        approver: Ulid,
        at: Ms,
    },
    BookingRejected {
        id: Ulid,
        approver: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        actor: Ulid,
        at: Ms,
    },
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Room,
    Asset,
    Ticket,
    Reservation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Room => "room",
            EntityKind::Asset => "asset",
            EntityKind::Ticket => "ticket",
            EntityKind::Reservation => "reservation",
        }
    }
}

/// Broadcast to subscribers on every successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub entity: EntityKind,
    pub entity_id: Ulid,
    pub from: &'static str,
    pub to: &'static str,
    pub at: Ms,
    pub actor: Option<Ulid>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub status: DisplayStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub requester: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub purpose: Option<String>,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub id: Ulid,
    pub name: String,
    pub category: String,
    pub status: AssetStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    fn booked(start: Ms, end: Ms) -> BookedSpan {
        BookedSpan {
            reservation_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn interval_ordering() {
        let mut rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        rs.insert_interval(booked(300, 400));
        rs.insert_interval(booked(100, 200));
        rs.insert_interval(booked(200, 300));
        assert_eq!(rs.intervals[0].span.start, 100);
        assert_eq!(rs.intervals[1].span.start, 200);
        assert_eq!(rs.intervals[2].span.start, 300);
    }

    #[test]
    fn release_by_reservation_id() {
        let mut rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        let b = booked(100, 200);
        rs.insert_interval(b);
        assert_eq!(rs.intervals.len(), 1);
        let released = rs.release_interval(b.reservation_id);
        assert_eq!(released, Some(b));
        assert!(rs.intervals.is_empty());
    }

    #[test]
    fn release_unknown_returns_none() {
        let mut rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        rs.insert_interval(booked(100, 200));
        assert!(rs.release_interval(Ulid::new()).is_none());
        assert_eq!(rs.intervals.len(), 1);
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        rs.insert_interval(booked(100, 200)); // past
        rs.insert_interval(booked(450, 600)); // hit
        rs.insert_interval(booked(1000, 1100)); // future

        let query = Span::new(500, 800);
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Interval ending exactly at query.start is NOT overlapping (half-open)
        let mut rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        rs.insert_interval(booked(100, 200));
        let hits: Vec<_> = rs.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_spanning_interval_found() {
        let mut rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        rs.insert_interval(booked(0, 10_000));
        let hits: Vec<_> = rs.overlapping(&Span::new(500, 600)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn overlapping_empty_room() {
        let rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        assert!(rs.overlapping(&Span::new(0, 1000)).next().is_none());
    }

    #[test]
    fn display_status_derivation() {
        let mut rs = RoomState::new(Ulid::new(), "A101".into(), 40);
        rs.insert_interval(booked(1000, 2000));

        assert_eq!(rs.display_status(500), DisplayStatus::Available);
        assert_eq!(rs.display_status(1000), DisplayStatus::Booked);
        assert_eq!(rs.display_status(1999), DisplayStatus::Booked);
        assert_eq!(rs.display_status(2000), DisplayStatus::Available); // half-open

        rs.status = RoomStatus::Maintenance;
        // Maintenance wins over a live interval
        assert_eq!(rs.display_status(1500), DisplayStatus::Maintenance);
    }

    #[test]
    fn open_ticket_lookup() {
        let mut asset = AssetState::new(Ulid::new(), "Projector".into(), "teaching".into());
        assert!(asset.open_ticket().is_none());

        let tid = Ulid::new();
        asset.tickets.insert(
            tid,
            RepairTicket {
                id: tid,
                target: TicketTarget::Asset(asset.id),
                submitter: Ulid::new(),
                status: TicketStatus::Completed,
                maintainer: None,
                submitted_at: 1000,
                completed_at: Some(2000),
            },
        );
        assert!(asset.open_ticket().is_none());

        let tid2 = Ulid::new();
        asset.tickets.insert(
            tid2,
            RepairTicket {
                id: tid2,
                target: TicketTarget::Asset(asset.id),
                submitter: Ulid::new(),
                status: TicketStatus::Pending,
                maintainer: None,
                submitted_at: 3000,
                completed_at: None,
            },
        );
        assert_eq!(asset.open_ticket().map(|t| t.id), Some(tid2));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingRequested {
            id: Ulid::new(),
            room_id: Ulid::new(),
            requester: Ulid::new(),
            span: Span::new(1_000_000_000_000, 1_000_000_360_000),
            purpose: Some("seminar".into()),
            at: 999_999_999_999,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn charge_event_roundtrip() {
        let event = Event::TicketAssigned {
            id: Ulid::new(),
            maintainer: Ulid::new(),
            actor: Ulid::new(),
            charge: Some(Charge {
                entry_id: Ulid::new(),
                amount: 12_500,
            }),
            at: 1_700_000_000_000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
