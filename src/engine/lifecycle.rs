use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Engine, EngineError, SharedAssetState};

/// Where a ticket lives: inside its asset's state (shared lock), or as
/// a standalone location ticket (own lock, no cross-entity effects).
enum TicketSlot {
    Owned(SharedAssetState),
    Site(Arc<RwLock<RepairTicket>>),
}

impl Engine {
    pub async fn register_asset(
        &self,
        id: Ulid,
        name: String,
        category: String,
        price: Option<Cents>,
        registrar: Ulid,
    ) -> Result<(), EngineError> {
        if self.assets.len() >= MAX_ASSETS {
            return Err(EngineError::LimitExceeded("too many assets"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("asset name too long"));
        }
        if category.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("asset category too long"));
        }
        if self.assets.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let at = now_ms();
        let charge = price.map(|amount| Charge {
            entry_id: Ulid::new(),
            amount,
        });
        let event = Event::AssetRegistered {
            id,
            name: name.clone(),
            category: category.clone(),
            registrar,
            charge,
            at,
        };
        self.wal_append(&event).await?;
        self.assets
            .insert(id, Arc::new(RwLock::new(AssetState::new(id, name, category))));
        if let Some(c) = charge {
            self.record_charge(ChargeKind::Purchase, &c, registrar, id, at);
        }
        Ok(())
    }

    /// Normal|UnderRepair → Scrapped. Guarded: an open ticket anywhere
    /// on the asset blocks the transition and is named in the error.
    pub async fn scrap_asset(&self, id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let st = self.get_asset(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = st.write().await;

        if guard.status == AssetStatus::Scrapped {
            return Err(EngineError::IllegalTransition {
                entity: EntityKind::Asset,
                from: AssetStatus::Scrapped.as_str(),
                to: AssetStatus::Scrapped.as_str(),
            });
        }
        if let Some(open) = guard.open_ticket() {
            return Err(EngineError::GuardViolation {
                entity: id,
                blocker: open.id,
                reason: "open repair ticket",
            });
        }
        let from = guard.status.as_str();

        let at = now_ms();
        let event = Event::AssetScrapped { id, actor, at };
        self.wal_append(&event).await?;
        self.apply_asset_event(&mut guard, &event);
        self.emit(
            id,
            Transition {
                entity: EntityKind::Asset,
                entity_id: id,
                from,
                to: AssetStatus::Scrapped.as_str(),
                at,
                actor: Some(actor),
            },
        );
        Ok(())
    }

    /// File a repair ticket against an asset or a location. The ticket
    /// starts Pending with its submit timestamp stamped here.
    pub async fn file_ticket(
        &self,
        id: Ulid,
        target: TicketTarget,
        submitter: Ulid,
    ) -> Result<RepairTicket, EngineError> {
        if self.ticket_to_asset.contains_key(&id) || self.site_tickets.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        match target {
            TicketTarget::Asset(asset_id) => {
                let st = self
                    .get_asset(&asset_id)
                    .ok_or(EngineError::NotFound(asset_id))?;
                let mut guard = st.write().await;
                if guard.status == AssetStatus::Scrapped {
                    return Err(EngineError::GuardViolation {
                        entity: id,
                        blocker: asset_id,
                        reason: "asset is scrapped",
                    });
                }
                if guard.tickets.len() >= MAX_TICKETS_PER_ASSET {
                    return Err(EngineError::LimitExceeded("too many tickets on asset"));
                }

                let event = Event::TicketFiled {
                    id,
                    target: TicketTarget::Asset(asset_id),
                    submitter,
                    at: now_ms(),
                };
                self.wal_append(&event).await?;
                self.apply_asset_event(&mut guard, &event);
                Ok(guard.tickets.get(&id).cloned().expect("ticket just applied"))
            }
            TicketTarget::Location(location) => {
                if location.len() > MAX_LOCATION_LEN {
                    return Err(EngineError::LimitExceeded("location too long"));
                }

                let at = now_ms();
                let event = Event::TicketFiled {
                    id,
                    target: TicketTarget::Location(location.clone()),
                    submitter,
                    at,
                };
                self.wal_append(&event).await?;
                let ticket = RepairTicket {
                    id,
                    target: TicketTarget::Location(location),
                    submitter,
                    status: TicketStatus::Pending,
                    maintainer: None,
                    submitted_at: at,
                    completed_at: None,
                };
                self.site_tickets
                    .insert(id, Arc::new(RwLock::new(ticket.clone())));
                Ok(ticket)
            }
        }
    }

    /// Pending → Processing. Attaches the maintainer; an asset-linked
    /// ticket flips its asset to UnderRepair, and an optional fee lands
    /// on the ledger as a maintenance charge.
    pub async fn assign_ticket(
        &self,
        id: Ulid,
        maintainer: Ulid,
        fee: Option<Cents>,
        actor: Ulid,
    ) -> Result<RepairTicket, EngineError> {
        let at = now_ms();
        let charge = fee.map(|amount| Charge {
            entry_id: Ulid::new(),
            amount,
        });
        let event = Event::TicketAssigned {
            id,
            maintainer,
            actor,
            charge,
            at,
        };
        self.transition_ticket(id, TicketStatus::Processing, event, actor, |status| {
            *status == TicketStatus::Pending
        })
        .await
    }

    /// Processing → Completed. The machine stamps the completion time —
    /// callers cannot supply it. An optional cost lands on the ledger as
    /// a repair charge.
    pub async fn complete_ticket(
        &self,
        id: Ulid,
        cost: Option<Cents>,
        actor: Ulid,
    ) -> Result<RepairTicket, EngineError> {
        let at = now_ms();
        let charge = cost.map(|amount| Charge {
            entry_id: Ulid::new(),
            amount,
        });
        let event = Event::TicketCompleted {
            id,
            actor,
            charge,
            at,
        };
        self.transition_ticket(id, TicketStatus::Completed, event, actor, |status| {
            *status == TicketStatus::Processing
        })
        .await
    }

    /// Pending|Processing → Cancelled.
    pub async fn cancel_ticket(&self, id: Ulid, actor: Ulid) -> Result<RepairTicket, EngineError> {
        let event = Event::TicketCancelled {
            id,
            actor,
            at: now_ms(),
        };
        self.transition_ticket(id, TicketStatus::Cancelled, event, actor, |status| {
            status.is_open()
        })
        .await
    }

    /// Shared guard-check/commit/notify path for the three ticket
    /// transitions. The `admissible` predicate is the transition table
    /// row; everything else — lock scope, WAL ordering, the asset side
    /// effect and its notification — is identical across actions.
    async fn transition_ticket(
        &self,
        id: Ulid,
        to: TicketStatus,
        event: Event,
        actor: Ulid,
        admissible: impl Fn(&TicketStatus) -> bool,
    ) -> Result<RepairTicket, EngineError> {
        match self.resolve_ticket(&id)? {
            TicketSlot::Owned(st) => {
                let mut guard = st.write().await;
                let ticket = guard.tickets.get(&id).ok_or(EngineError::NotFound(id))?;
                if !admissible(&ticket.status) {
                    return Err(EngineError::IllegalTransition {
                        entity: EntityKind::Ticket,
                        from: ticket.status.as_str(),
                        to: to.as_str(),
                    });
                }
                let from = ticket.status.as_str();
                let asset_before = guard.status;

                self.wal_append(&event).await?;
                self.apply_asset_event(&mut guard, &event);

                let at = ticket_event_at(&event);
                self.emit(
                    guard.id,
                    Transition {
                        entity: EntityKind::Ticket,
                        entity_id: id,
                        from,
                        to: to.as_str(),
                        at,
                        actor: Some(actor),
                    },
                );
                if guard.status != asset_before {
                    self.emit(
                        guard.id,
                        Transition {
                            entity: EntityKind::Asset,
                            entity_id: guard.id,
                            from: asset_before.as_str(),
                            to: guard.status.as_str(),
                            at,
                            actor: Some(actor),
                        },
                    );
                }
                Ok(guard.tickets.get(&id).cloned().expect("ticket just applied"))
            }
            TicketSlot::Site(slot) => {
                let mut guard = slot.write().await;
                if !admissible(&guard.status) {
                    return Err(EngineError::IllegalTransition {
                        entity: EntityKind::Ticket,
                        from: guard.status.as_str(),
                        to: to.as_str(),
                    });
                }
                let from = guard.status.as_str();

                self.wal_append(&event).await?;
                self.apply_ticket_event(&mut guard, &event);
                self.emit(
                    id,
                    Transition {
                        entity: EntityKind::Ticket,
                        entity_id: id,
                        from,
                        to: to.as_str(),
                        at: ticket_event_at(&event),
                        actor: Some(actor),
                    },
                );
                Ok(guard.clone())
            }
        }
    }

    fn resolve_ticket(&self, id: &Ulid) -> Result<TicketSlot, EngineError> {
        if let Some(asset_id) = self.asset_for_ticket(id) {
            let st = self
                .get_asset(&asset_id)
                .ok_or(EngineError::NotFound(asset_id))?;
            return Ok(TicketSlot::Owned(st));
        }
        if let Some(entry) = self.site_tickets.get(id) {
            return Ok(TicketSlot::Site(entry.value().clone()));
        }
        Err(EngineError::NotFound(*id))
    }
}

fn ticket_event_at(event: &Event) -> Ms {
    match event {
        Event::TicketAssigned { at, .. }
        | Event::TicketCompleted { at, .. }
        | Event::TicketCancelled { at, .. } => *at,
        _ => 0,
    }
}
