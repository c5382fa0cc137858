use chrono::{NaiveDate, NaiveTime};
use tracing::warn;

use crate::clock;
use crate::model::*;

/// Opening window of a business on one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayWindow {
    Closed,
    Open(Span),
}

/// Resolve the weekly schedule entry for `date` into an absolute window.
///
/// Missing entries and closed days yield `Closed`. An open day whose
/// opening time is not before its closing time is bad data: it is logged
/// and treated as closed.
pub fn resolve_day_window(business: &BusinessState, date: NaiveDate) -> DayWindow {
    let dow = clock::day_of_week(date);
    let Some(entry) = business.schedule_for_day(dow) else {
        return DayWindow::Closed;
    };
    if entry.is_closed {
        return DayWindow::Closed;
    }
    if entry.open_time >= entry.close_time {
        warn!(
            business_id = %business.id,
            day_of_week = dow,
            open = %entry.open_time,
            close = %entry.close_time,
            "malformed schedule entry: opening time not before closing time"
        );
        return DayWindow::Closed;
    }
    DayWindow::Open(Span::new(
        clock::at(date, entry.open_time),
        clock::at(date, entry.close_time),
    ))
}

/// Seven entries (Sunday first) describing the week a new business starts with.
pub fn seed_week(policy: crate::config::DefaultWeek) -> Vec<ScheduleEntry> {
    use crate::config::DefaultWeek;

    let open_time = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN);
    let close_time = NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN);
    (0u8..7)
        .map(|day_of_week| {
            let weekend = day_of_week == 0 || day_of_week == 6;
            ScheduleEntry {
                day_of_week,
                open_time,
                close_time,
                is_closed: match policy {
                    DefaultWeek::Weekdays => weekend,
                    DefaultWeek::AllWeek => false,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultWeek;
    use ulid::Ulid;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn business_with(entry: ScheduleEntry) -> BusinessState {
        let mut bs = BusinessState::new(Ulid::new(), "Barber".into());
        bs.set_schedule_entry(entry);
        bs
    }

    // 2026-10-19 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn open_day_resolves_to_absolute_window() {
        let bs = business_with(ScheduleEntry {
            day_of_week: 1,
            open_time: hm(9, 0),
            close_time: hm(17, 0),
            is_closed: false,
        });
        let DayWindow::Open(window) = resolve_day_window(&bs, monday()) else {
            panic!("expected open day");
        };
        assert_eq!(window.start, clock::at(monday(), hm(9, 0)));
        assert_eq!(window.end, clock::at(monday(), hm(17, 0)));
    }

    #[test]
    fn missing_entry_is_closed() {
        let bs = BusinessState::new(Ulid::new(), "Barber".into());
        assert_eq!(resolve_day_window(&bs, monday()), DayWindow::Closed);
    }

    #[test]
    fn closed_flag_ignores_times() {
        let bs = business_with(ScheduleEntry {
            day_of_week: 1,
            open_time: hm(9, 0),
            close_time: hm(17, 0),
            is_closed: true,
        });
        assert_eq!(resolve_day_window(&bs, monday()), DayWindow::Closed);
    }

    #[test]
    fn inverted_hours_treated_as_closed() {
        let bs = business_with(ScheduleEntry {
            day_of_week: 1,
            open_time: hm(17, 0),
            close_time: hm(9, 0),
            is_closed: false,
        });
        assert_eq!(resolve_day_window(&bs, monday()), DayWindow::Closed);

        let equal = business_with(ScheduleEntry {
            day_of_week: 1,
            open_time: hm(9, 0),
            close_time: hm(9, 0),
            is_closed: false,
        });
        assert_eq!(resolve_day_window(&equal, monday()), DayWindow::Closed);
    }

    #[test]
    fn entry_for_other_day_does_not_apply() {
        let bs = business_with(ScheduleEntry {
            day_of_week: 2,
            open_time: hm(9, 0),
            close_time: hm(17, 0),
            is_closed: false,
        });
        assert_eq!(resolve_day_window(&bs, monday()), DayWindow::Closed);
    }

    #[test]
    fn weekdays_policy_closes_weekend() {
        let week = seed_week(DefaultWeek::Weekdays);
        assert_eq!(week.len(), 7);
        let closed: Vec<u8> = week.iter().filter(|e| e.is_closed).map(|e| e.day_of_week).collect();
        assert_eq!(closed, vec![0, 6]);
    }

    #[test]
    fn all_week_policy_opens_every_day() {
        let week = seed_week(DefaultWeek::AllWeek);
        assert!(week.iter().all(|e| !e.is_closed));
        assert!(week.iter().all(|e| e.open_time == hm(9, 0) && e.close_time == hm(17, 0)));
    }
}
