pub mod controller;
pub mod debounce;
pub mod detail;
pub mod filter;
pub mod pagination;
pub mod query;

pub use controller::{DisplayMode, FetchOutcome, ListingController, ListingView};
pub use debounce::{Debouncer, SEARCH_DEBOUNCE};
pub use detail::{load_room_detail, RoomDetail};
pub use filter::{PriceBucket, SearchState, SortKey};
pub use pagination::{Pagination, ADMIN_PAGE_SIZE, LISTING_PAGE_SIZE};
pub use query::{ListingQuery, LISTING_COLUMNS};
