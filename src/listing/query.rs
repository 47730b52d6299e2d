use super::filter::{PriceBucket, SortKey};
use super::pagination::Pagination;
use crate::backend::{Filter, SelectRequest};

/// Columns shown on listing cards
pub const LISTING_COLUMNS: &str = "id, title, address, price, status, area, banner";

/// Everything a listing page query depends on
#[derive(Debug, Clone, PartialEq)]
pub struct ListingQuery {
    /// Already debounced and trimmed
    pub keyword: String,
    pub price: PriceBucket,
    pub sort: SortKey,
    pub page: u32,
    pub page_size: u32,
}

impl ListingQuery {
    /// Server-side request: keyword OR-match on title/address, price bucket,
    /// sort order, page range and an exact count.
    pub fn to_request(&self) -> SelectRequest {
        let mut request = SelectRequest::new("rooms")
            .columns(LISTING_COLUMNS)
            .exact_count();

        let keyword = self.keyword.trim();
        if !keyword.is_empty() {
            let pattern = format!("%{}%", keyword);
            request = request.filter(Filter::Or(vec![
                Filter::ilike("title", pattern.clone()),
                Filter::ilike("address", pattern),
            ]));
        }

        for filter in self.price.filters() {
            request = request.filter(filter);
        }

        let range = Pagination::new(self.page_size).range_for(self.page);
        request.order(self.sort.order()).range(range.from, range.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Order, RowRange};

    #[test]
    fn cau_giay_mid_range_cheapest_first() {
        let query = ListingQuery {
            keyword: "Cầu Giấy".into(),
            price: "2 - 5 triệu".parse().unwrap(),
            sort: "Giá thấp đến cao".parse().unwrap(),
            page: 1,
            page_size: 5,
        };
        let request = query.to_request();

        assert_eq!(request.table, "rooms");
        assert!(request.exact_count);
        assert_eq!(
            request.filters,
            vec![
                Filter::Or(vec![
                    Filter::ilike("title", "%Cầu Giấy%"),
                    Filter::ilike("address", "%Cầu Giấy%"),
                ]),
                Filter::gte("price", 2_000_000),
                Filter::lte("price", 5_000_000),
            ]
        );
        assert_eq!(request.order, vec![Order::asc("price")]);
        assert_eq!(request.range, Some(RowRange { from: 0, to: 4 }));
    }

    #[test]
    fn blank_keyword_adds_no_predicate() {
        let query = ListingQuery {
            keyword: "   ".into(),
            price: PriceBucket::Any,
            sort: SortKey::Newest,
            page: 3,
            page_size: 5,
        };
        let request = query.to_request();
        assert!(request.filters.is_empty());
        assert_eq!(request.order, vec![Order::desc("created_at")]);
        assert_eq!(request.range, Some(RowRange { from: 10, to: 14 }));
    }
}
