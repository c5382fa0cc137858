use crate::model::*;

/// Emergency-block spans intersecting `day`, exactly as stored.
///
/// Blocks are already absolute, so nothing is clamped or merged; a block
/// running over midnight is returned whole and the overlap test handles it.
pub fn blocks_for_day(business: &BusinessState, day: &Span) -> Vec<Span> {
    business.blocks_overlapping(day).map(|b| b.span).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const DAY: Ms = 24 * H;

    fn add_block(bs: &mut BusinessState, start: Ms, end: Ms) {
        bs.insert_block(EmergencyBlock {
            id: Ulid::new(),
            business_id: bs.id,
            span: Span::new(start, end),
            reason: Some("plumbing".into()),
        });
    }

    #[test]
    fn only_blocks_touching_the_day() {
        let mut bs = BusinessState::new(Ulid::new(), "Spa".into());
        add_block(&mut bs, DAY - 2 * H, DAY); // ends exactly at midnight
        add_block(&mut bs, DAY + 12 * H, DAY + 13 * H);
        add_block(&mut bs, 2 * DAY, 2 * DAY + H); // starts at next midnight

        let day = Span::new(DAY, 2 * DAY);
        assert_eq!(blocks_for_day(&bs, &day), vec![Span::new(DAY + 12 * H, DAY + 13 * H)]);
    }

    #[test]
    fn multi_day_block_returned_unclamped() {
        let mut bs = BusinessState::new(Ulid::new(), "Spa".into());
        add_block(&mut bs, 0, 3 * DAY);
        let day = Span::new(DAY, 2 * DAY);
        assert_eq!(blocks_for_day(&bs, &day), vec![Span::new(0, 3 * DAY)]);
    }

    #[test]
    fn overlapping_blocks_not_merged() {
        let mut bs = BusinessState::new(Ulid::new(), "Spa".into());
        add_block(&mut bs, DAY + 10 * H, DAY + 12 * H);
        add_block(&mut bs, DAY + 11 * H, DAY + 13 * H);
        let day = Span::new(DAY, 2 * DAY);
        assert_eq!(blocks_for_day(&bs, &day).len(), 2);
    }
}
