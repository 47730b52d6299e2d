use crate::backend::{Filter, Order};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TWO_MILLION: i64 = 2_000_000;
const FIVE_MILLION: i64 = 5_000_000;
const TEN_MILLION: i64 = 10_000_000;

/// Monthly price ranges offered by the search bar.
///
/// The two middle buckets are inclusive on both ends, so 5,000,000 matches
/// both "2 - 5 triệu" and "5 - 10 triệu"; the tails are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PriceBucket {
    #[default]
    Any,
    Under2M,
    From2To5M,
    From5To10M,
    Over10M,
}

impl PriceBucket {
    pub const ALL: [PriceBucket; 5] = [
        PriceBucket::Any,
        PriceBucket::Under2M,
        PriceBucket::From2To5M,
        PriceBucket::From5To10M,
        PriceBucket::Over10M,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PriceBucket::Any => "Mức giá",
            PriceBucket::Under2M => "Dưới 2 triệu",
            PriceBucket::From2To5M => "2 - 5 triệu",
            PriceBucket::From5To10M => "5 - 10 triệu",
            PriceBucket::Over10M => "Trên 10 triệu",
        }
    }

    /// Predicates on the `price` column
    pub fn filters(&self) -> Vec<Filter> {
        match self {
            PriceBucket::Any => vec![],
            PriceBucket::Under2M => vec![Filter::lt("price", TWO_MILLION)],
            PriceBucket::From2To5M => vec![
                Filter::gte("price", TWO_MILLION),
                Filter::lte("price", FIVE_MILLION),
            ],
            PriceBucket::From5To10M => vec![
                Filter::gte("price", FIVE_MILLION),
                Filter::lte("price", TEN_MILLION),
            ],
            PriceBucket::Over10M => vec![Filter::gt("price", TEN_MILLION)],
        }
    }

    /// Same boundaries as `filters`, evaluated locally
    pub fn contains(&self, price: i64) -> bool {
        match self {
            PriceBucket::Any => true,
            PriceBucket::Under2M => price < TWO_MILLION,
            PriceBucket::From2To5M => (TWO_MILLION..=FIVE_MILLION).contains(&price),
            PriceBucket::From5To10M => (FIVE_MILLION..=TEN_MILLION).contains(&price),
            PriceBucket::Over10M => price > TEN_MILLION,
        }
    }
}

impl fmt::Display for PriceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PriceBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if let Some(bucket) = Self::ALL.iter().find(|b| b.label().eq_ignore_ascii_case(key)) {
            return Ok(*bucket);
        }
        match key.to_lowercase().as_str() {
            "" | "any" | "all" => Ok(PriceBucket::Any),
            "lt2" | "under-2m" => Ok(PriceBucket::Under2M),
            "2-5" => Ok(PriceBucket::From2To5M),
            "5-10" => Ok(PriceBucket::From5To10M),
            "gt10" | "over-10m" => Ok(PriceBucket::Over10M),
            other => Err(format!(
                "unknown price range '{}' (expected any, lt2, 2-5, 5-10 or gt10)",
                other
            )),
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
}

impl SortKey {
    pub const ALL: [SortKey; 3] = [SortKey::Newest, SortKey::PriceAsc, SortKey::PriceDesc];

    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Newest => "Mới nhất",
            SortKey::PriceAsc => "Giá thấp đến cao",
            SortKey::PriceDesc => "Giá cao đến thấp",
        }
    }

    pub fn order(&self) -> Order {
        match self {
            SortKey::Newest => Order::desc("created_at"),
            SortKey::PriceAsc => Order::asc("price"),
            SortKey::PriceDesc => Order::desc("price"),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if let Some(sort) = Self::ALL.iter().find(|k| k.label() == key) {
            return Ok(*sort);
        }
        match key.to_lowercase().as_str() {
            "" | "newest" => Ok(SortKey::Newest),
            "price-asc" => Ok(SortKey::PriceAsc),
            "price-desc" => Ok(SortKey::PriceDesc),
            other => Err(format!(
                "unknown sort '{}' (expected newest, price-asc or price-desc)",
                other
            )),
        }
    }
}

/// Search bar state.
///
/// `keyword` is what the user is typing; `debounced_keyword` is the trimmed
/// value the debouncer last settled on and is the only one that reaches queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    pub keyword: String,
    pub debounced_keyword: String,
    pub price: PriceBucket,
    pub sort: SortKey,
}

impl SearchState {
    pub fn set_keyword(&mut self, keyword: &str) {
        self.keyword = keyword.to_string();
    }

    pub fn apply_debounced(&mut self, keyword: &str) {
        self.debounced_keyword = keyword.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        let table = [
            (1_999_999, PriceBucket::Under2M),
            (2_000_000, PriceBucket::From2To5M),
            (5_000_000, PriceBucket::From2To5M),
            (10_000_000, PriceBucket::From5To10M),
            (10_000_001, PriceBucket::Over10M),
        ];
        for (price, bucket) in table {
            assert!(bucket.contains(price), "{} should be in {}", price, bucket);
        }
        assert!(!PriceBucket::Under2M.contains(2_000_000));
        assert!(PriceBucket::From5To10M.contains(5_000_000));
        assert!(!PriceBucket::Over10M.contains(10_000_000));
    }

    #[test]
    fn bucket_filters_match_boundary_table() {
        assert!(PriceBucket::Any.filters().is_empty());
        assert_eq!(
            PriceBucket::Under2M.filters(),
            vec![Filter::lt("price", 2_000_000)]
        );
        assert_eq!(
            PriceBucket::From2To5M.filters(),
            vec![Filter::gte("price", 2_000_000), Filter::lte("price", 5_000_000)]
        );
        assert_eq!(
            PriceBucket::From5To10M.filters(),
            vec![Filter::gte("price", 5_000_000), Filter::lte("price", 10_000_000)]
        );
        assert_eq!(
            PriceBucket::Over10M.filters(),
            vec![Filter::gt("price", 10_000_000)]
        );
    }

    #[test]
    fn parses_labels_and_short_forms() {
        assert_eq!("2 - 5 triệu".parse::<PriceBucket>(), Ok(PriceBucket::From2To5M));
        assert_eq!("gt10".parse::<PriceBucket>(), Ok(PriceBucket::Over10M));
        assert!("cheap".parse::<PriceBucket>().is_err());

        assert_eq!("Giá thấp đến cao".parse::<SortKey>(), Ok(SortKey::PriceAsc));
        assert_eq!("price-desc".parse::<SortKey>(), Ok(SortKey::PriceDesc));
        assert_eq!(SortKey::Newest.order(), Order::desc("created_at"));
    }

    #[test]
    fn debounced_keyword_is_trimmed() {
        let mut state = SearchState::default();
        state.set_keyword("  Cầu Giấy ");
        assert_eq!(state.debounced_keyword, "");
        state.apply_debounced(&state.keyword.clone());
        assert_eq!(state.debounced_keyword, "Cầu Giấy");
    }
}
