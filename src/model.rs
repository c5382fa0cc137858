use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Milliseconds since the Unix epoch of a naive wall-clock time, the only
/// absolute time type inside the engine. No timezone is ever applied.
pub type Ms = i64;

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

    /// Touching endpoints do not overlap: a booking ending at 10:00 and one
    /// starting at 10:00 can coexist.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Opening hours for one day of the week. `day_of_week` is 0 = Sunday … 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub day_of_week: u8,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    /// When set, the open/close times are ignored.
    pub is_closed: bool,
}

/// Ad-hoc closure expressed in absolute time, independent of the weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyBlock {
    pub id: Ulid,
    pub business_id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    /// Always > 0. A booking occupies exactly this many minutes.
    pub duration_minutes: u32,
    pub price_cents: u64,
}

impl Service {
    pub fn duration_ms(&self) -> Ms {
        Ms::from(self.duration_minutes) * 60_000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
}

/// Who asked for the appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Booker {
    Customer {
        customer_id: Ulid,
    },
    /// No account, identified by contact fields only.
    Guest {
        name: String,
        email: String,
        phone: Option<String>,
    },
}

impl Booker {
    pub fn customer_id(&self) -> Option<Ulid> {
        match self {
            Booker::Customer { customer_id } => Some(*customer_id),
            Booker::Guest { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Rejected,
}

impl AppointmentStatus {
    /// Cancelled and rejected appointments free their slot; completed ones
    /// keep occupying it.
    pub fn occupies(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Rejected)
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// A persisted booking. `span.end` is fixed at write time from the service
/// duration and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub booker: Booker,
    pub span: Span,
    pub status: AppointmentStatus,
    pub created_at: Ms,
}

/// Optional criteria for listing or purging appointments. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub staff_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub customer_id: Option<Ulid>,
    /// Keep appointments overlapping this window.
    pub window: Option<Span>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        self.status.is_none_or(|s| a.status == s)
            && self.staff_id.is_none_or(|s| a.staff_id == Some(s))
            && self.service_id.is_none_or(|s| a.service_id == s)
            && self.customer_id.is_none_or(|c| a.booker.customer_id() == Some(c))
            && self.window.is_none_or(|w| a.span.overlaps(&w))
    }
}

#[derive(Debug, Clone)]
pub struct BusinessState {
    pub id: Ulid,
    pub name: String,
    /// Indexed by day of week, 0 = Sunday.
    pub schedule: [Option<ScheduleEntry>; 7],
    pub staff: Vec<StaffMember>,
    pub services: Vec<Service>,
    /// Sorted by `span.start`.
    pub blocks: Vec<EmergencyBlock>,
    /// Sorted by `span.start`.
    pub appointments: Vec<Appointment>,
}

impl BusinessState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            schedule: Default::default(),
            staff: Vec::new(),
            services: Vec::new(),
            blocks: Vec::new(),
            appointments: Vec::new(),
        }
    }

    // ── Schedule ────────────────────────────────────────────

    /// Replaces whatever entry the day had.
    pub fn set_schedule_entry(&mut self, entry: ScheduleEntry) {
        let idx = entry.day_of_week as usize;
        if idx < 7 {
            self.schedule[idx] = Some(entry);
        }
    }

    pub fn schedule_for_day(&self, day_of_week: u8) -> Option<&ScheduleEntry> {
        self.schedule.get(day_of_week as usize).and_then(|e| e.as_ref())
    }

    // ── Services & staff ────────────────────────────────────

    pub fn service(&self, id: &Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == *id)
    }

    pub fn upsert_service(&mut self, service: Service) {
        match self.services.iter_mut().find(|s| s.id == service.id) {
            Some(existing) => *existing = service,
            None => self.services.push(service),
        }
    }

    pub fn remove_service(&mut self, id: &Ulid) -> Option<Service> {
        let pos = self.services.iter().position(|s| s.id == *id)?;
        Some(self.services.remove(pos))
    }

    pub fn staff_member(&self, id: &Ulid) -> Option<&StaffMember> {
        self.staff.iter().find(|s| s.id == *id)
    }

    pub fn remove_staff(&mut self, id: &Ulid) -> Option<StaffMember> {
        let pos = self.staff.iter().position(|s| s.id == *id)?;
        Some(self.staff.remove(pos))
    }

    // ── Emergency blocks ────────────────────────────────────

    /// Insert block maintaining sort order by span.start.
    pub fn insert_block(&mut self, block: EmergencyBlock) {
        let pos = self
            .blocks
            .binary_search_by_key(&block.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, block);
    }

    pub fn remove_block(&mut self, id: &Ulid) -> Option<EmergencyBlock> {
        let pos = self.blocks.iter().position(|b| b.id == *id)?;
        Some(self.blocks.remove(pos))
    }

    /// Blocks whose span overlaps the query window.
    pub fn blocks_overlapping(&self, query: &Span) -> impl Iterator<Item = &EmergencyBlock> {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self.blocks.partition_point(|b| b.span.start < query.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    // ── Appointments ────────────────────────────────────────

    /// Insert appointment maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn appointment_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    pub fn remove_appointment(&mut self, id: &Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == *id)?;
        Some(self.appointments.remove(pos))
    }

    /// Appointments (any status) whose span overlaps the query window.
    pub fn appointments_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    /// Appointments that still hold their slot within the window. With a staff
    /// filter only that member's appointments count; without one the whole
    /// business is a single resource.
    pub fn active_appointments(
        &self,
        query: &Span,
        staff_id: Option<Ulid>,
    ) -> impl Iterator<Item = &Appointment> {
        self.appointments_overlapping(query).filter(move |a| {
            a.status.occupies() && staff_id.is_none_or(|s| a.staff_id == Some(s))
        })
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessCreated {
        id: Ulid,
        name: String,
        schedule: Vec<ScheduleEntry>,
    },
    BusinessDeleted {
        id: Ulid,
    },
    ScheduleEntrySet {
        business_id: Ulid,
        entry: ScheduleEntry,
    },
    StaffAdded {
        id: Ulid,
        business_id: Ulid,
        name: String,
    },
    StaffRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    ServiceCreated {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: u32,
        price_cents: u64,
    },
    ServiceUpdated {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: u32,
        price_cents: u64,
    },
    ServiceRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    BlockAdded {
        id: Ulid,
        business_id: Ulid,
        span: Span,
        reason: Option<String>,
    },
    BlockRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        business_id: Ulid,
        service_id: Ulid,
        staff_id: Option<Ulid>,
        booker: Booker,
        span: Span,
        status: AppointmentStatus,
        created_at: Ms,
    },
    AppointmentStatusChanged {
        id: Ulid,
        business_id: Ulid,
        status: AppointmentStatus,
    },
    AppointmentsPurged {
        business_id: Ulid,
        ids: Vec<Ulid>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInfo {
    pub id: Ulid,
    pub name: String,
    pub staff_count: usize,
    pub service_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(start: Ms, end: Ms, status: AppointmentStatus, staff_id: Option<Ulid>) -> Appointment {
        Appointment {
            id: Ulid::new(),
            business_id: Ulid::nil(),
            service_id: Ulid::nil(),
            staff_id,
            booker: Booker::Customer { customer_id: Ulid::new() },
            span: Span::new(start, end),
            status,
            created_at: 0,
        }
    }

    fn block(start: Ms, end: Ms) -> EmergencyBlock {
        EmergencyBlock {
            id: Ulid::new(),
            business_id: Ulid::nil(),
            span: Span::new(start, end),
            reason: None,
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer)); // self-containment
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn status_occupancy() {
        assert!(AppointmentStatus::Pending.occupies());
        assert!(AppointmentStatus::Confirmed.occupies());
        assert!(AppointmentStatus::Completed.occupies());
        assert!(!AppointmentStatus::Cancelled.occupies());
        assert!(!AppointmentStatus::Rejected.occupies());
    }

    #[test]
    fn status_transitions() {
        use AppointmentStatus::*;
        let all = [Pending, Confirmed, Cancelled, Completed, Rejected];
        let allowed = [
            (Pending, Confirmed),
            (Pending, Rejected),
            (Pending, Cancelled),
            (Confirmed, Cancelled),
            (Confirmed, Completed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn appointments_kept_sorted() {
        let mut bs = BusinessState::new(Ulid::new(), "Salon".into());
        bs.insert_appointment(appointment(300, 400, AppointmentStatus::Pending, None));
        bs.insert_appointment(appointment(100, 200, AppointmentStatus::Pending, None));
        bs.insert_appointment(appointment(200, 300, AppointmentStatus::Pending, None));
        let starts: Vec<Ms> = bs.appointments.iter().map(|a| a.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn blocks_overlapping_skips_past_and_future() {
        let mut bs = BusinessState::new(Ulid::new(), "Salon".into());
        bs.insert_block(block(100, 200));
        bs.insert_block(block(450, 600));
        bs.insert_block(block(1000, 1100));
        let hits: Vec<_> = bs.blocks_overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn blocks_overlapping_adjacent_not_included() {
        let mut bs = BusinessState::new(Ulid::new(), "Salon".into());
        bs.insert_block(block(100, 200));
        assert_eq!(bs.blocks_overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn long_block_spanning_query_is_found() {
        let mut bs = BusinessState::new(Ulid::new(), "Salon".into());
        bs.insert_block(block(0, 10_000));
        assert_eq!(bs.blocks_overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn active_appointments_skip_freed_slots() {
        let mut bs = BusinessState::new(Ulid::new(), "Salon".into());
        bs.insert_appointment(appointment(100, 200, AppointmentStatus::Cancelled, None));
        bs.insert_appointment(appointment(100, 200, AppointmentStatus::Rejected, None));
        bs.insert_appointment(appointment(150, 250, AppointmentStatus::Completed, None));
        let hits: Vec<_> = bs.active_appointments(&Span::new(0, 1000), None).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, AppointmentStatus::Completed);
    }

    #[test]
    fn active_appointments_staff_filter() {
        let alice = Ulid::new();
        let bob = Ulid::new();
        let mut bs = BusinessState::new(Ulid::new(), "Salon".into());
        bs.insert_appointment(appointment(100, 200, AppointmentStatus::Confirmed, Some(alice)));
        bs.insert_appointment(appointment(100, 200, AppointmentStatus::Confirmed, Some(bob)));
        bs.insert_appointment(appointment(100, 200, AppointmentStatus::Confirmed, None));

        let query = Span::new(0, 1000);
        assert_eq!(bs.active_appointments(&query, Some(alice)).count(), 1);
        assert_eq!(bs.active_appointments(&query, None).count(), 3);
    }

    #[test]
    fn schedule_entry_replaced_per_day() {
        let mut bs = BusinessState::new(Ulid::new(), "Salon".into());
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        bs.set_schedule_entry(ScheduleEntry { day_of_week: 1, open_time: nine, close_time: five, is_closed: false });
        bs.set_schedule_entry(ScheduleEntry { day_of_week: 1, open_time: nine, close_time: five, is_closed: true });
        assert!(bs.schedule_for_day(1).unwrap().is_closed);
        assert!(bs.schedule_for_day(2).is_none());
        assert!(bs.schedule_for_day(9).is_none());
    }

    #[test]
    fn filter_matches_fields() {
        let staff = Ulid::new();
        let a = appointment(100, 200, AppointmentStatus::Pending, Some(staff));
        assert!(AppointmentFilter::default().matches(&a));
        assert!(AppointmentFilter { staff_id: Some(staff), ..Default::default() }.matches(&a));
        assert!(!AppointmentFilter { status: Some(AppointmentStatus::Confirmed), ..Default::default() }.matches(&a));
        assert!(!AppointmentFilter { window: Some(Span::new(200, 300)), ..Default::default() }.matches(&a));
        assert!(AppointmentFilter { customer_id: a.booker.customer_id(), ..Default::default() }.matches(&a));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BusinessCreated {
            id: Ulid::new(),
            name: "Test".into(),
            schedule: vec![ScheduleEntry {
                day_of_week: 3,
                open_time: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
                close_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                is_closed: false,
            }],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
