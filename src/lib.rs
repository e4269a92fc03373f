//! custos — reservation admission and lifecycle-state engine for shared
//! institutional resources: bookable rooms, tracked assets, repair
//! tickets and the financial trail their transitions leave behind.
//!
//! The request-serving layer lives elsewhere; this crate owns the
//! invariants: per-room non-overlapping committed intervals, closed
//! transition tables per entity, and a WAL that makes in-memory state a
//! pure function of the committed event sequence.

pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
