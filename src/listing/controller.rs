use super::debounce::{Debouncer, SEARCH_DEBOUNCE};
use super::filter::{PriceBucket, SearchState, SortKey};
use super::pagination::Pagination;
use super::query::ListingQuery;
use crate::backend::{BackendError, BackendResult, TableClient};
use crate::models::Room;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How the room list should currently be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Nothing loaded yet: skeleton cards
    Placeholder,
    /// Existing rows stay visible under a light overlay
    Overlay,
    Ready,
}

/// Rows of the current page plus loading and error state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingView {
    pub rooms: Vec<Room>,
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
    pub fetching: bool,
    pub loaded_once: bool,
    pub error: Option<String>,
}

impl ListingView {
    pub fn display_mode(&self) -> DisplayMode {
        match (self.loaded_once, self.fetching) {
            (false, true) => DisplayMode::Placeholder,
            (true, true) => DisplayMode::Overlay,
            _ => DisplayMode::Ready,
        }
    }

    /// Plain-text rendering used by the CLI
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(error) = &self.error {
            let _ = writeln!(out, "Lỗi: {}", error);
        }
        let _ = writeln!(out, "Tổng {} kết quả", self.total);
        for (i, room) in self.rooms.iter().enumerate() {
            let _ = writeln!(out, "{}. {} [#{}]", i + 1, room.title, room.id);
            let _ = writeln!(out, "   {}", room.address);
            let _ = write!(out, "   {} · {}", room.price_label(), room.status.badge());
            if let Some(area) = room.area {
                let _ = write!(out, " · {} m²", area);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "Trang {}/{}", self.page, self.total_pages.max(1));
        out
    }
}

/// What happened to a fetch once its response arrived
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Applied { page: u32, rows: usize, total: u64 },
    /// A newer request was issued meanwhile; this response was dropped.
    Stale { seq: u64 },
}

struct ListingState {
    search: SearchState,
    pagination: Pagination,
    view: ListingView,
}

/// Drives the public room list: search state, pagination and fetches.
///
/// Each fetch takes a sequence number; only the response to the most
/// recently issued fetch is applied.
pub struct ListingController {
    table: Arc<dyn TableClient>,
    state: Mutex<ListingState>,
    issued: AtomicU64,
}

impl ListingController {
    pub fn new(table: Arc<dyn TableClient>, page_size: u32) -> Self {
        let pagination = Pagination::new(page_size);
        Self {
            table,
            state: Mutex::new(ListingState {
                search: SearchState::default(),
                view: ListingView {
                    page: pagination.page(),
                    total_pages: pagination.total_pages(),
                    ..ListingView::default()
                },
                pagination,
            }),
            issued: AtomicU64::new(0),
        }
    }

    pub async fn view(&self) -> ListingView {
        self.state.lock().await.view.clone()
    }

    pub async fn search(&self) -> SearchState {
        self.state.lock().await.search.clone()
    }

    pub async fn page(&self) -> u32 {
        self.state.lock().await.pagination.page()
    }

    /// The query the next fetch would send
    pub async fn current_query(&self) -> ListingQuery {
        let state = self.state.lock().await;
        Self::query_of(&state)
    }

    fn query_of(state: &ListingState) -> ListingQuery {
        ListingQuery {
            keyword: state.search.debounced_keyword.clone(),
            price: state.search.price,
            sort: state.search.sort,
            page: state.pagination.page(),
            page_size: state.pagination.page_size(),
        }
    }

    /// Raw keystroke; has no effect on queries until debounced.
    pub async fn type_keyword(&self, keyword: &str) {
        self.state.lock().await.search.set_keyword(keyword);
    }

    /// Apply a settled keyword and go back to page 1.
    pub async fn apply_keyword(&self, keyword: &str) {
        let mut state = self.state.lock().await;
        state.search.apply_debounced(keyword);
        state.pagination.reset();
    }

    pub async fn set_price(&self, price: PriceBucket) {
        let mut state = self.state.lock().await;
        state.search.price = price;
        state.pagination.reset();
    }

    pub async fn set_sort(&self, sort: SortKey) {
        let mut state = self.state.lock().await;
        state.search.sort = sort;
        state.pagination.reset();
    }

    pub async fn next_page(&self) -> bool {
        self.state.lock().await.pagination.next_page()
    }

    pub async fn prev_page(&self) -> bool {
        self.state.lock().await.pagination.prev_page()
    }

    pub async fn jump_to(&self, page: u32) -> bool {
        self.state.lock().await.pagination.jump_to(page)
    }

    /// Fetch the current page.
    ///
    /// Remote failures are recorded on the view and returned; a response that
    /// lost the race to a newer fetch is discarded whether it succeeded or not.
    pub async fn fetch(&self) -> BackendResult<FetchOutcome> {
        let (seq, query) = {
            let mut state = self.state.lock().await;
            let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            state.view.fetching = true;
            (seq, Self::query_of(&state))
        };

        debug!("Fetch #{} for {:?}", seq, query);
        let result = self.table.select(&query.to_request()).await;

        let mut state = self.state.lock().await;
        let latest = self.issued.load(Ordering::SeqCst);
        if seq != latest {
            debug!("Dropping response #{} (latest is #{})", seq, latest);
            return Ok(FetchOutcome::Stale { seq });
        }
        state.view.fetching = false;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!("Room list fetch failed: {}", err);
                state.view.error = Some(err.user_message());
                state.view.loaded_once = true;
                return Err(err);
            }
        };

        let rooms = response
            .rows
            .into_iter()
            .map(serde_json::from_value::<Room>)
            .collect::<Result<Vec<_>, _>>();
        let rooms = match rooms {
            Ok(rooms) => rooms,
            Err(err) => {
                let err = BackendError::from(err);
                state.view.error = Some(err.user_message());
                state.view.loaded_once = true;
                return Err(err);
            }
        };

        let total = response.count.unwrap_or(rooms.len() as u64);
        state.pagination.set_total(total);
        let rows = rooms.len();
        state.view = ListingView {
            rooms,
            total,
            page: query.page,
            total_pages: state.pagination.total_pages(),
            fetching: false,
            loaded_once: true,
            error: None,
        };
        info!("Loaded page {} ({} rows, {} total)", query.page, rows, total);

        Ok(FetchOutcome::Applied {
            page: query.page,
            rows,
            total,
        })
    }

    /// Wire a debouncer to this controller: every settled keyword resets the
    /// page and triggers a fetch. Returns the keystroke sink and the driver task.
    pub fn attach_search(self: &Arc<Self>) -> (Debouncer, JoinHandle<()>) {
        let (debouncer, mut settled) = Debouncer::spawn(SEARCH_DEBOUNCE);
        let controller = Arc::clone(self);
        let driver = tokio::spawn(async move {
            while let Some(keyword) = settled.recv().await {
                controller.apply_keyword(&keyword).await;
                if let Err(err) = controller.fetch().await {
                    warn!("Search fetch failed: {}", err);
                }
            }
        });
        (debouncer, driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;
    use std::time::Duration;

    fn rooms_backend(count: usize) -> MemoryBackend {
        let backend = MemoryBackend::new();
        let rows = (0..count)
            .map(|i| {
                json!({
                    "title": format!("Phòng {}", i),
                    "address": if i % 2 == 0 { "Cầu Giấy" } else { "Đống Đa" },
                    "price": 1_000_000 + (i as i64) * 500_000,
                    "status": "available",
                    "created_at": format!("2024-01-{:02}T00:00:00Z", i + 1),
                })
            })
            .collect();
        backend.seed("rooms", rows);
        backend
    }

    fn controller(backend: &MemoryBackend) -> Arc<ListingController> {
        Arc::new(ListingController::new(Arc::new(backend.clone()), 5))
    }

    #[tokio::test]
    async fn first_fetch_computes_pages() {
        let backend = rooms_backend(12);
        let controller = controller(&backend);

        assert_eq!(controller.view().await.display_mode(), DisplayMode::Ready);
        let outcome = controller.fetch().await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Applied { page: 1, rows: 5, total: 12 }
        );

        let view = controller.view().await;
        assert_eq!(view.total_pages, 3);
        assert!(view.loaded_once);
        // Newest first
        assert_eq!(view.rooms[0].title, "Phòng 11");

        assert!(controller.jump_to(4).await);
        assert_eq!(controller.page().await, 3);
        controller.fetch().await.unwrap();
        assert_eq!(controller.view().await.rooms.len(), 2);
    }

    #[tokio::test]
    async fn sort_change_resets_to_first_page_before_fetch() {
        let backend = rooms_backend(12);
        let controller = controller(&backend);
        controller.fetch().await.unwrap();
        assert!(controller.next_page().await);
        assert_eq!(controller.page().await, 2);

        controller.set_sort(SortKey::PriceAsc).await;
        assert_eq!(controller.current_query().await.page, 1);
        controller.fetch().await.unwrap();
        let view = controller.view().await;
        assert_eq!(view.page, 1);
        assert_eq!(view.rooms[0].price, 1_000_000);

        controller.next_page().await;
        controller.set_price(PriceBucket::From2To5M).await;
        assert_eq!(controller.page().await, 1);
        controller.fetch().await.unwrap();
        let view = controller.view().await;
        assert!(view.rooms.iter().all(|r| PriceBucket::From2To5M.contains(r.price)));
        assert_eq!(view.total, 7);
    }

    #[tokio::test]
    async fn keyword_filters_title_or_address() {
        let backend = rooms_backend(6);
        let controller = controller(&backend);
        controller.apply_keyword(" cầu giấy ").await;
        controller.fetch().await.unwrap();
        let view = controller.view().await;
        assert_eq!(view.total, 3);
        assert!(view.rooms.iter().all(|r| r.address == "Cầu Giấy"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_earlier_response_is_discarded() {
        let backend = rooms_backend(12);
        backend.set_select_latency("rooms", Duration::from_millis(500));
        let controller = controller(&backend);

        let slow = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.fetch().await })
        };
        tokio::task::yield_now().await;

        backend.set_select_latency("rooms", Duration::from_millis(10));
        controller.set_sort(SortKey::PriceDesc).await;
        let fast = controller.fetch().await.unwrap();
        assert!(matches!(fast, FetchOutcome::Applied { .. }));

        let stale = slow.await.unwrap().unwrap();
        assert_eq!(stale, FetchOutcome::Stale { seq: 1 });
        let view = controller.view().await;
        assert_eq!(view.rooms[0].price, 6_500_000);
        assert!(!view.fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_fires_one_query_after_quiet_period() {
        let backend = rooms_backend(6);
        let controller = controller(&backend);
        let (debouncer, _driver) = controller.attach_search();

        for partial in ["C", "Cầ", "Cầu", "Cầu G", "Cầu Giấy"] {
            controller.type_keyword(partial).await;
            debouncer.push(partial);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(backend.select_calls(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.select_calls(), 1);
        assert_eq!(controller.view().await.total, 3);
        assert_eq!(controller.search().await.debounced_keyword, "Cầu Giấy");
    }

    #[test]
    fn display_modes() {
        let mut view = ListingView {
            fetching: true,
            ..ListingView::default()
        };
        assert_eq!(view.display_mode(), DisplayMode::Placeholder);
        view.loaded_once = true;
        assert_eq!(view.display_mode(), DisplayMode::Overlay);
        view.fetching = false;
        assert_eq!(view.display_mode(), DisplayMode::Ready);
    }
}
