use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span, max_duration: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > max_duration {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Re-check a requested interval against what is already booked in the same
/// scope. Must run while the caller holds the business write lock, right
/// before the insert, so no other booking can slip in between.
pub(crate) fn check_no_conflict(
    business: &BusinessState,
    span: &Span,
    staff_id: Option<Ulid>,
) -> Result<(), EngineError> {
    match business.active_appointments(span, staff_id).next() {
        Some(existing) => Err(EngineError::TimeSlotUnavailable(existing.id)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::*;

    const M: Ms = 60_000;

    fn business_with(span: Span, status: AppointmentStatus, staff_id: Option<Ulid>) -> (BusinessState, Ulid) {
        let mut bs = BusinessState::new(Ulid::new(), "Studio".into());
        let id = Ulid::new();
        bs.insert_appointment(Appointment {
            id,
            business_id: bs.id,
            service_id: Ulid::new(),
            staff_id,
            booker: Booker::Customer { customer_id: Ulid::new() },
            span,
            status,
            created_at: 0,
        });
        (bs, id)
    }

    #[test]
    fn overlap_reports_existing_appointment() {
        let (bs, id) = business_with(Span::new(60 * M, 90 * M), AppointmentStatus::Confirmed, None);
        let err = check_no_conflict(&bs, &Span::new(75 * M, 105 * M), None).unwrap_err();
        assert!(matches!(err, EngineError::TimeSlotUnavailable(x) if x == id));
    }

    #[test]
    fn touching_is_not_a_conflict() {
        let (bs, _) = business_with(Span::new(60 * M, 90 * M), AppointmentStatus::Confirmed, None);
        assert!(check_no_conflict(&bs, &Span::new(90 * M, 120 * M), None).is_ok());
        assert!(check_no_conflict(&bs, &Span::new(30 * M, 60 * M), None).is_ok());
    }

    #[test]
    fn rejected_and_cancelled_do_not_conflict() {
        for status in [AppointmentStatus::Rejected, AppointmentStatus::Cancelled] {
            let (bs, _) = business_with(Span::new(60 * M, 90 * M), status, None);
            assert!(check_no_conflict(&bs, &Span::new(60 * M, 90 * M), None).is_ok());
        }
    }

    #[test]
    fn completed_still_conflicts() {
        let (bs, _) = business_with(Span::new(60 * M, 90 * M), AppointmentStatus::Completed, None);
        assert!(check_no_conflict(&bs, &Span::new(60 * M, 90 * M), None).is_err());
    }

    #[test]
    fn other_staff_does_not_conflict() {
        let (bs, _) = business_with(Span::new(60 * M, 90 * M), AppointmentStatus::Pending, Some(Ulid::new()));
        assert!(check_no_conflict(&bs, &Span::new(60 * M, 90 * M), Some(Ulid::new())).is_ok());
        // Business-wide booking sees every staff member's appointments.
        assert!(check_no_conflict(&bs, &Span::new(60 * M, 90 * M), None).is_err());
    }

    #[test]
    fn validate_span_before_epoch() {
        let span = Span { start: -1, end: 100 };
        assert!(matches!(validate_span(&span, MAX_BLOCK_DURATION_MS), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn validate_span_far_future() {
        let span = Span { start: MAX_VALID_TIMESTAMP_MS - 10, end: MAX_VALID_TIMESTAMP_MS + 1 };
        assert!(validate_span(&span, MAX_BLOCK_DURATION_MS).is_err());
    }

    #[test]
    fn validate_span_too_wide() {
        let span = Span { start: 0, end: MAX_BLOCK_DURATION_MS + 1 };
        assert!(validate_span(&span, MAX_BLOCK_DURATION_MS).is_err());
        let at_limit = Span { start: 0, end: MAX_BLOCK_DURATION_MS };
        assert!(validate_span(&at_limit, MAX_BLOCK_DURATION_MS).is_ok());
    }

    #[test]
    fn validate_span_inverted() {
        let span = Span { start: 200, end: 100 };
        assert!(matches!(validate_span(&span, MAX_BLOCK_DURATION_MS), Err(EngineError::InvalidInput(_))));
        let empty = Span { start: 100, end: 100 };
        assert!(validate_span(&empty, MAX_BLOCK_DURATION_MS).is_err());
    }
}
