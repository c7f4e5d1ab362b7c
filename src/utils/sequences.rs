//! Year-scoped sequential reference numbering

use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

use crate::traits::SequenceGenerator;

/// In-memory [`SequenceGenerator`] producing `key/year/0001`-style
/// references, with an independent counter per key and year
#[derive(Debug, Clone, Default)]
pub struct SimpleSequences {
    counters: HashMap<(String, i32), u32>,
}

impl SimpleSequences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceGenerator for SimpleSequences {
    fn next(&mut self, key: &str, date: NaiveDate) -> String {
        let year = date.year();
        let counter = self.counters.entry((key.to_string(), year)).or_insert(0);
        *counter += 1;
        format!("{}/{}/{:04}", key, year, counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_scoped_per_key_and_year() {
        let mut sequences = SimpleSequences::new();
        let d2024 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2025 = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();

        assert_eq!(sequences.next("BNK", d2024), "BNK/2024/0001");
        assert_eq!(sequences.next("BNK", d2024), "BNK/2024/0002");
        assert_eq!(sequences.next("CSH", d2024), "CSH/2024/0001");
        assert_eq!(sequences.next("BNK", d2025), "BNK/2025/0001");
    }
}
