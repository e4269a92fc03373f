use ulid::Ulid;

use crate::model::{EntityKind, Ms};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed half-open interval: start must be strictly before end.
    InvalidInterval { start: Ms, end: Ms },
    /// The room is closed for maintenance and accepts no new requests.
    UnderMaintenance(Ulid),
    /// Approval lost to an already committed reservation; carries the
    /// blocking reservation's id. An expected business outcome, not an
    /// internal failure.
    Conflict(Ulid),
    /// The attempted transition is not in the entity's table.
    IllegalTransition {
        entity: EntityKind,
        from: &'static str,
        to: &'static str,
    },
    /// A related entity blocks the transition (e.g. an open ticket
    /// blocks scrapping its asset). Names the blocker.
    GuardViolation {
        entity: Ulid,
        blocker: Ulid,
        reason: &'static str,
    },
    LimitExceeded(&'static str),
    /// The backing log failed mid-operation; nothing was mutated. The
    /// only error class worth retrying.
    WalError(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must precede end")
            }
            EngineError::UnderMaintenance(id) => {
                write!(f, "room {id} is under maintenance")
            }
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::IllegalTransition { entity, from, to } => {
                write!(f, "illegal {} transition: {from} -> {to}", entity.as_str())
            }
            EngineError::GuardViolation {
                entity,
                blocker,
                reason,
            } => {
                write!(f, "cannot transition {entity}: {reason} ({blocker})")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
