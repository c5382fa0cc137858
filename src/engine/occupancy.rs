use ulid::Ulid;

use crate::model::*;

/// Intervals already taken within `window`, using the stored end of each
/// appointment. Cancelled and rejected appointments are skipped.
pub fn occupancy(business: &BusinessState, window: &Span, staff_id: Option<Ulid>) -> Vec<Span> {
    business
        .active_appointments(window, staff_id)
        .map(|a| a.span)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = 60_000;

    fn book(bs: &mut BusinessState, start: Ms, end: Ms, status: AppointmentStatus, staff_id: Option<Ulid>) {
        bs.insert_appointment(Appointment {
            id: Ulid::new(),
            business_id: bs.id,
            service_id: Ulid::new(),
            staff_id,
            booker: Booker::Guest {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                phone: None,
            },
            span: Span::new(start, end),
            status,
            created_at: 0,
        });
    }

    #[test]
    fn cancelled_frees_slot() {
        let mut bs = BusinessState::new(Ulid::new(), "Clinic".into());
        book(&mut bs, 60 * M, 90 * M, AppointmentStatus::Confirmed, None);
        book(&mut bs, 120 * M, 150 * M, AppointmentStatus::Cancelled, None);
        let occ = occupancy(&bs, &Span::new(0, 1440 * M), None);
        assert_eq!(occ, vec![Span::new(60 * M, 90 * M)]);
    }

    #[test]
    fn staff_filter_excludes_unassigned() {
        let staff = Ulid::new();
        let mut bs = BusinessState::new(Ulid::new(), "Clinic".into());
        book(&mut bs, 60 * M, 90 * M, AppointmentStatus::Pending, Some(staff));
        book(&mut bs, 90 * M, 120 * M, AppointmentStatus::Pending, None);
        book(&mut bs, 120 * M, 150 * M, AppointmentStatus::Pending, Some(Ulid::new()));

        let day = Span::new(0, 1440 * M);
        assert_eq!(occupancy(&bs, &day, Some(staff)), vec![Span::new(60 * M, 90 * M)]);
        assert_eq!(occupancy(&bs, &day, None).len(), 3);
    }

    #[test]
    fn outside_window_ignored() {
        let mut bs = BusinessState::new(Ulid::new(), "Clinic".into());
        book(&mut bs, 0, 30 * M, AppointmentStatus::Confirmed, None);
        let occ = occupancy(&bs, &Span::new(30 * M, 60 * M), None);
        assert!(occ.is_empty());
    }
}
