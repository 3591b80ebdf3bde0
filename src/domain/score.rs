// A single completion attempt's rating, compared only within one round.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub completion: u8,
    pub finesse: u8,
    pub time_ms: i64,
    pub timestamp: i64,
}

impl Score {
    pub fn is_ss(&self) -> bool {
        self.completion == 5 && self.finesse == 5
    }

    // Higher completion+finesse wins; faster time breaks ties; earlier
    // timestamp breaks ties after that. Mirrors the upstream leaderboard's
    // `ss_key`.
    fn order_key(&self) -> (u8, i64, i64) {
        (self.completion + self.finesse, -self.time_ms, -self.timestamp)
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_rating_wins_regardless_of_time() {
        let better = Score { completion: 5, finesse: 5, time_ms: 99_000, timestamp: 1 };
        let worse = Score { completion: 5, finesse: 4, time_ms: 1_000, timestamp: 1 };
        assert!(better > worse);
    }

    #[test]
    fn faster_time_wins_at_equal_rating() {
        let faster = Score { completion: 5, finesse: 5, time_ms: 10_000, timestamp: 1 };
        let slower = Score { completion: 5, finesse: 5, time_ms: 20_000, timestamp: 1 };
        assert!(faster > slower);
    }

    #[test]
    fn earlier_timestamp_wins_remaining_tie() {
        let earlier = Score { completion: 5, finesse: 5, time_ms: 10_000, timestamp: 100 };
        let later = Score { completion: 5, finesse: 5, time_ms: 10_000, timestamp: 200 };
        assert!(earlier > later);
    }
}
