use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::clock;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_span};
use super::schedule::seed_week;
use super::{unmap_business, Engine, EngineError, WalCommand};

/// Everything needed to book one appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Option<Ulid>,
    /// Wall-clock start; the end comes from the service duration.
    pub start: NaiveDateTime,
    pub booker: Booker,
    /// Skip the Pending state and book as Confirmed.
    pub auto_confirm: bool,
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_booker(booker: &Booker) -> Result<(), EngineError> {
    match booker {
        Booker::Customer { .. } => Ok(()),
        Booker::Guest { name, email, phone } => {
            if name.trim().is_empty() {
                return Err(EngineError::InvalidInput("guest name must not be empty"));
            }
            if !email.contains('@') {
                return Err(EngineError::InvalidInput("guest email is not valid"));
            }
            let too_long = name.len() > MAX_CONTACT_LEN
                || email.len() > MAX_CONTACT_LEN
                || phone.as_ref().is_some_and(|p| p.len() > MAX_CONTACT_LEN);
            if too_long {
                return Err(EngineError::LimitExceeded("guest contact field too long"));
            }
            Ok(())
        }
    }
}

fn validate_duration(duration_minutes: u32) -> Result<(), EngineError> {
    if duration_minutes == 0 {
        return Err(EngineError::InvalidInput("service duration must be positive"));
    }
    if duration_minutes > MAX_SERVICE_MINUTES {
        return Err(EngineError::LimitExceeded("service duration too long"));
    }
    Ok(())
}

/// Appointments that still lie ahead of the business: they pin the service
/// and staff member they reference.
fn upcoming(a: &Appointment) -> bool {
    matches!(a.status, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
}

impl Engine {
    // ── Businesses ───────────────────────────────────────────

    /// Onboard a business. Its week is seeded from the configured default.
    pub async fn create_business(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        validate_name(&name)?;
        if self.state.len() >= MAX_BUSINESSES {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        let _gate = self.wal_gate.read().await;

        let schedule = seed_week(self.config.default_week);
        let event = Event::BusinessCreated {
            id,
            name: name.clone(),
            schedule: schedule.clone(),
        };
        let mut bs = BusinessState::new(id, name);
        for entry in schedule.iter().cloned() {
            bs.set_schedule_entry(entry);
        }

        // Publish the state locked so the id is claimed before the WAL write;
        // anyone looking it up meanwhile waits on the lock.
        let shared = Arc::new(RwLock::new(bs));
        let guard = shared.clone().write_owned().await;
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }
        if self.entity_to_business.contains_key(&id) {
            self.state.remove(&id);
            return Err(EngineError::AlreadyExists(id));
        }
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&id);
            return Err(e);
        }
        drop(guard);
        metrics::gauge!(observability::BUSINESSES_ACTIVE).set(self.state.len() as f64);
        info!(business_id = %id, "business created");
        Ok(())
    }

    /// Remove a business together with its schedule, staff, services, blocks
    /// and appointments.
    pub async fn delete_business(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.business_write(&id).await?;
        let event = Event::BusinessDeleted { id };
        self.wal_append(&event).await?;
        unmap_business(&guard, &self.entity_to_business);
        self.state.remove(&id);
        drop(guard);
        metrics::gauge!(observability::BUSINESSES_ACTIVE).set(self.state.len() as f64);
        info!(business_id = %id, "business deleted");
        Ok(())
    }

    // ── Weekly schedule ──────────────────────────────────────

    /// Replace the opening hours of one weekday (0 = Sunday). Times are "HH:MM".
    /// When `is_closed` is set the times are still parsed but never used.
    pub async fn set_schedule_entry(
        &self,
        business_id: Ulid,
        day_of_week: u8,
        open_time: &str,
        close_time: &str,
        is_closed: bool,
    ) -> Result<(), EngineError> {
        if day_of_week > 6 {
            return Err(EngineError::InvalidInput("day of week must be 0-6"));
        }
        let entry = ScheduleEntry {
            day_of_week,
            open_time: clock::parse_hhmm(open_time)?,
            close_time: clock::parse_hhmm(close_time)?,
            is_closed,
        };
        let mut guard = self.business_write(&business_id).await?;
        let event = Event::ScheduleEntrySet { business_id, entry };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Staff ────────────────────────────────────────────────

    pub async fn add_staff(&self, id: Ulid, business_id: Ulid, name: String) -> Result<(), EngineError> {
        validate_name(&name)?;
        let mut guard = self.business_write(&business_id).await?;
        if guard.staff.len() >= MAX_STAFF_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        let event = Event::StaffAdded { id, business_id, name };
        self.persist_new_entity(&mut guard, id, &event).await
    }

    /// Refused while pending or confirmed appointments are assigned to the member.
    pub async fn remove_staff(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        if guard.staff_member(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        if guard.appointments.iter().any(|a| a.staff_id == Some(id) && upcoming(a)) {
            return Err(EngineError::InUse(id));
        }
        let business_id = guard.id;
        let event = Event::StaffRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    // ── Services ─────────────────────────────────────────────

    pub async fn create_service(
        &self,
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: u32,
        price_cents: u64,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_duration(duration_minutes)?;
        let mut guard = self.business_write(&business_id).await?;
        if guard.services.len() >= MAX_SERVICES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let event = Event::ServiceCreated {
            id,
            business_id,
            name,
            duration_minutes,
            price_cents,
        };
        self.persist_new_entity(&mut guard, id, &event).await
    }

    /// Changing the duration only affects future bookings; existing
    /// appointments keep the end they were stored with.
    pub async fn update_service(
        &self,
        id: Ulid,
        name: String,
        duration_minutes: u32,
        price_cents: u64,
    ) -> Result<Ulid, EngineError> {
        validate_name(&name)?;
        validate_duration(duration_minutes)?;
        let mut guard = self.resolve_entity_write(&id).await?;
        if guard.service(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let business_id = guard.id;
        let event = Event::ServiceUpdated {
            id,
            business_id,
            name,
            duration_minutes,
            price_cents,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    /// Refused while pending or confirmed appointments are booked for the service.
    pub async fn remove_service(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        if guard.service(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        if guard.appointments.iter().any(|a| a.service_id == id && upcoming(a)) {
            return Err(EngineError::InUse(id));
        }
        let business_id = guard.id;
        let event = Event::ServiceRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    // ── Emergency blocks ─────────────────────────────────────

    /// Close the business for `[start, end)`. Blocks may overlap each other.
    pub async fn add_block(
        &self,
        id: Ulid,
        business_id: Ulid,
        start: NaiveDateTime,
        end: NaiveDateTime,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let span = Span {
            start: clock::to_ms(start),
            end: clock::to_ms(end),
        };
        validate_span(&span, MAX_BLOCK_DURATION_MS)?;
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("reason too long"));
            }
        let mut guard = self.business_write(&business_id).await?;
        if guard.blocks.len() >= MAX_BLOCKS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many emergency blocks"));
        }
        let event = Event::BlockAdded {
            id,
            business_id,
            span,
            reason,
        };
        self.persist_new_entity(&mut guard, id, &event).await?;
        info!(business_id = %business_id, block_id = %id, "emergency block added");
        Ok(())
    }

    pub async fn remove_block(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        if !guard.blocks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let business_id = guard.id;
        let event = Event::BlockRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    // ── Appointments ─────────────────────────────────────────

    /// Book an appointment, refusing it if the interval overlaps an existing
    /// appointment in the same scope (the staff member when one is given,
    /// otherwise the whole business).
    ///
    /// Validation, the overlap check, the WAL append and the insert all run
    /// under one hold of the business write lock, so two racing requests for
    /// the same slot cannot both pass the check.
    pub async fn create_appointment(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let id = req.id;
        let business_id = req.business_id;
        let result = self.book(req).await;
        match &result {
            Ok(a) => {
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "created").increment(1);
                info!(
                    business_id = %business_id,
                    appointment_id = %id,
                    start = %clock::format_hhmm(a.span.start),
                    status = %a.status,
                    "appointment booked"
                );
            }
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => observability::booking_outcome(e))
                    .increment(1);
                debug!(business_id = %business_id, appointment_id = %id, "booking refused: {e}");
            }
        }
        result
    }

    async fn book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        validate_booker(&req.booker)?;

        let mut guard = self.business_write(&req.business_id).await?;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }
        let duration = guard
            .service(&req.service_id)
            .ok_or(EngineError::NotFound(req.service_id))?
            .duration_ms();
        if let Some(staff_id) = req.staff_id
            && guard.staff_member(&staff_id).is_none() {
                return Err(EngineError::NotFound(staff_id));
            }

        let start = clock::to_ms(req.start);
        let span = Span {
            start,
            end: start + duration,
        };
        validate_span(&span, Ms::from(MAX_SERVICE_MINUTES) * 60_000)?;

        check_no_conflict(&guard, &span, req.staff_id)?;

        let status = if req.auto_confirm {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Pending
        };
        let appointment = Appointment {
            id: req.id,
            business_id: req.business_id,
            service_id: req.service_id,
            staff_id: req.staff_id,
            booker: req.booker,
            span,
            status,
            created_at: clock::now_ms(),
        };
        let event = Event::AppointmentBooked {
            id: appointment.id,
            business_id: appointment.business_id,
            service_id: appointment.service_id,
            staff_id: appointment.staff_id,
            booker: appointment.booker.clone(),
            span: appointment.span,
            status: appointment.status,
            created_at: appointment.created_at,
        };
        self.persist_new_entity(&mut guard, appointment.id, &event).await?;
        Ok(appointment)
    }

    /// Move an appointment along its status machine. Nothing is written when
    /// the transition is not allowed.
    pub async fn update_appointment_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard
            .appointment(&id)
            .ok_or(EngineError::NotFound(id))?
            .status;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: status,
            });
        }
        let business_id = guard.id;
        let event = Event::AppointmentStatusChanged {
            id,
            business_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::STATUS_CHANGES_TOTAL, "status" => status.to_string())
            .increment(1);
        info!(business_id = %business_id, appointment_id = %id, "appointment {current} -> {status}");
        guard
            .appointment(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Admin bulk delete. Removes every appointment of the business matching
    /// the filter and returns how many were removed.
    pub async fn purge_appointments(
        &self,
        business_id: Ulid,
        filter: &AppointmentFilter,
    ) -> Result<usize, EngineError> {
        let mut guard = self.business_write(&business_id).await?;
        let ids: Vec<Ulid> = guard
            .appointments
            .iter()
            .filter(|a| filter.matches(a))
            .map(|a| a.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len();
        let event = Event::AppointmentsPurged { business_id, ids };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(business_id = %business_id, count, "appointments purged");
        Ok(count)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Holds the WAL gate exclusively from the snapshot through the swap, so
    /// no event can reach the old log after its business was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.wal_gate.write().await;
        let mut events = Vec::new();

        let business_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in business_ids {
            let Some(shared) = self.get_business(&id) else {
                continue;
            };
            let guard = shared.read().await;
            snapshot_business(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
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

/// Minimal event sequence recreating one business.
fn snapshot_business(bs: &BusinessState, events: &mut Vec<Event>) {
    events.push(Event::BusinessCreated {
        id: bs.id,
        name: bs.name.clone(),
        schedule: bs.schedule.iter().flatten().cloned().collect(),
    });
    for s in &bs.staff {
        events.push(Event::StaffAdded {
            id: s.id,
            business_id: bs.id,
            name: s.name.clone(),
        });
    }
    for s in &bs.services {
        events.push(Event::ServiceCreated {
            id: s.id,
            business_id: bs.id,
            name: s.name.clone(),
            duration_minutes: s.duration_minutes,
            price_cents: s.price_cents,
        });
    }
    for b in &bs.blocks {
        events.push(Event::BlockAdded {
            id: b.id,
            business_id: bs.id,
            span: b.span,
            reason: b.reason.clone(),
        });
    }
    for a in &bs.appointments {
        events.push(Event::AppointmentBooked {
            id: a.id,
            business_id: bs.id,
            service_id: a.service_id,
            staff_id: a.staff_id,
            booker: a.booker.clone(),
            span: a.span,
            status: a.status,
            created_at: a.created_at,
        });
    }
}
