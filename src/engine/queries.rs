use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock;
use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::observability;

use super::availability::generate_slots;
use super::blocks::blocks_for_day;
use super::occupancy::occupancy;
use super::schedule::{resolve_day_window, DayWindow};
use super::{Engine, EngineError};

impl Engine {
    /// Bookable start times ("HH:MM", ascending) for `service_id` on `date`.
    ///
    /// A closed or malformed day yields an empty list, not an error. With a
    /// staff id only that member's appointments occupy time; emergency
    /// blocks always apply to the whole business.
    pub async fn compute_availability(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        service_id: Ulid,
        staff_id: Option<Ulid>,
    ) -> Result<Vec<String>, EngineError> {
        let started = std::time::Instant::now();
        let result = self
            .compute_slots(business_id, date, service_id, staff_id)
            .await
            .map(|slots| slots.into_iter().map(clock::format_hhmm).collect());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL, "status" => status).increment(1);
        metrics::histogram!(observability::AVAILABILITY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Same as `compute_availability` but returns absolute slot starts.
    pub async fn compute_slots(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        service_id: Ulid,
        staff_id: Option<Ulid>,
    ) -> Result<Vec<Ms>, EngineError> {
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;

        let duration = guard
            .service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?
            .duration_ms();
        if let Some(staff_id) = staff_id
            && guard.staff_member(&staff_id).is_none() {
                return Err(EngineError::NotFound(staff_id));
            }

        let window = match resolve_day_window(&guard, date) {
            DayWindow::Closed => return Ok(Vec::new()),
            DayWindow::Open(window) => window,
        };
        // Bookings outside the storable range are refused, so offer nothing there.
        if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
            return Ok(Vec::new());
        }

        let day = clock::day_span(date);
        let occupied = occupancy(&guard, &day, staff_id);
        let blocked = blocks_for_day(&guard, &day);

        Ok(generate_slots(
            &window,
            duration,
            self.config.slot_step_ms(),
            &occupied,
            &blocked,
        ))
    }

    pub fn list_businesses(&self) -> Vec<BusinessInfo> {
        let ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(shared) = self.get_business(&id) else {
                continue;
            };
            // Skip businesses that are mid-write rather than block the listing.
            if let Ok(guard) = shared.try_read() {
                infos.push(BusinessInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    staff_count: guard.staff.len(),
                    service_count: guard.services.len(),
                });
            }
        }
        infos.sort_by_key(|b| b.id);
        infos
    }

    /// The seven weekday slots, Sunday first. `None` means no entry (closed).
    pub async fn get_schedule(&self, business_id: Ulid) -> Result<Vec<Option<ScheduleEntry>>, EngineError> {
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;
        Ok(guard.schedule.to_vec())
    }

    pub async fn list_staff(&self, business_id: Ulid) -> Result<Vec<StaffMember>, EngineError> {
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;
        Ok(guard.staff.clone())
    }

    pub async fn list_services(&self, business_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;
        Ok(guard.services.clone())
    }

    pub async fn get_service(&self, service_id: Ulid) -> Result<Service, EngineError> {
        let business_id = self
            .get_business_for_entity(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;
        guard
            .service(&service_id)
            .cloned()
            .ok_or(EngineError::NotFound(service_id))
    }

    /// Blocks ordered by start. With a window, only blocks overlapping it.
    pub async fn list_blocks(
        &self,
        business_id: Ulid,
        window: Option<Span>,
    ) -> Result<Vec<EmergencyBlock>, EngineError> {
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;
        Ok(match window {
            Some(w) => guard.blocks_overlapping(&w).cloned().collect(),
            None => guard.blocks.clone(),
        })
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let business_id = self
            .get_business_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;
        guard
            .appointment(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Appointments ordered by start, restricted by `filter`.
    pub async fn list_appointments(
        &self,
        business_id: Ulid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, EngineError> {
        let shared = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = shared.read().await;
        let matching: Vec<Appointment> = match filter.window {
            Some(w) => guard
                .appointments_overlapping(&w)
                .filter(|a| filter.matches(a))
                .cloned()
                .collect(),
            None => guard
                .appointments
                .iter()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect(),
        };
        Ok(matching)
    }
}
