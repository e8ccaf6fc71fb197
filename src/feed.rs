use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::data::{PageRequest, PageSource};
use crate::media::MediaResolver;
use crate::normalize::normalize_page;
use crate::post::DisplayPost;

/// Total used by the pager when the backend does not report one.
pub const DEFAULT_FALLBACK_TOTAL: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Loading,
    Ready,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalSource {
    Fetched,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub filter_visibility: bool,
    pub fallback_total: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            filter_visibility: true,
            fallback_total: DEFAULT_FALLBACK_TOTAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedState {
    /// Latest request issued; the one the view is waiting on or showing.
    pub request: Option<PageRequest>,
    /// Request whose posts are currently held in `posts`.
    pub shown: Option<PageRequest>,
    pub status: FeedStatus,
    pub posts: Vec<DisplayPost>,
    pub total: u64,
    pub total_source: TotalSource,
}

struct Pending {
    request_id: u64,
    request: PageRequest,
}

struct NormalizedPage {
    posts: Vec<DisplayPost>,
    total: Option<u64>,
}

struct PageResponse {
    request_id: u64,
    request: PageRequest,
    result: Result<NormalizedPage>,
}

/// Fetches and normalizes feed pages off the UI thread.
///
/// Every fetch is tagged with a request id; only the response for the most
/// recent request is applied, so a slow older page can never replace a newer
/// one. Posts are swapped wholesale on success and left untouched on failure.
pub struct FeedLoader {
    source: Arc<dyn PageSource>,
    resolver: Arc<MediaResolver>,
    options: LoaderOptions,
    state: FeedState,
    latest: Option<Pending>,
    next_request_id: u64,
    response_tx: Sender<PageResponse>,
    response_rx: Receiver<PageResponse>,
}

impl FeedLoader {
    pub fn new(
        source: Arc<dyn PageSource>,
        resolver: Arc<MediaResolver>,
        options: LoaderOptions,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        let state = FeedState {
            request: None,
            shown: None,
            status: FeedStatus::Idle,
            posts: Vec::new(),
            total: options.fallback_total,
            total_source: TotalSource::Fallback,
        };
        Self {
            source,
            resolver,
            options,
            state,
            latest: None,
            next_request_id: 1,
            response_tx,
            response_rx,
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn posts(&self) -> &[DisplayPost] {
        &self.state.posts
    }

    pub fn is_loading(&self) -> bool {
        self.state.status == FeedStatus::Loading
    }

    pub fn page_count(&self, page_size: u32) -> u64 {
        let size = u64::from(page_size.max(1));
        self.state.total.div_ceil(size).max(1)
    }

    /// Requests `page`. Returns `false` when it equals the latest request,
    /// which is already in flight or on screen.
    pub fn load(&mut self, page: u32, page_size: u32) -> bool {
        let request = PageRequest::new(page, page_size);
        if self.latest.as_ref().map(|pending| pending.request) == Some(request) {
            return false;
        }
        self.issue(request);
        true
    }

    /// Fetches the latest request again under a new tag.
    pub fn reload(&mut self) -> bool {
        let Some(request) = self.latest.as_ref().map(|pending| pending.request) else {
            return false;
        };
        self.issue(request);
        true
    }

    /// Applies every response that has arrived. Returns whether state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(response) = self.response_rx.try_recv() {
            changed |= self.apply(response);
        }
        changed
    }

    /// Like [`FeedLoader::poll`], but waits up to `timeout` for the first response.
    pub fn poll_timeout(&mut self, timeout: Duration) -> bool {
        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => {
                let changed = self.apply(response);
                self.poll() || changed
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn issue(&mut self, request: PageRequest) {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.latest = Some(Pending {
            request_id,
            request,
        });
        self.state.request = Some(request);
        self.state.status = FeedStatus::Loading;
        tracing::debug!(
            request_id,
            page = request.page,
            page_size = request.page_size,
            "feed: issue request"
        );

        let tx = self.response_tx.clone();
        let source = self.source.clone();
        let resolver = self.resolver.clone();
        let filter_visibility = self.options.filter_visibility;
        thread::spawn(move || {
            let result = source.fetch_page(request).map(|raw| NormalizedPage {
                posts: normalize_page(&raw.posts, &resolver, filter_visibility),
                total: raw.total,
            });
            let _ = tx.send(PageResponse {
                request_id,
                request,
                result,
            });
        });
    }

    fn apply(&mut self, response: PageResponse) -> bool {
        let PageResponse {
            request_id,
            request,
            result,
        } = response;
        let Some(latest) = &self.latest else {
            return false;
        };
        if latest.request_id != request_id {
            tracing::debug!(request_id, page = request.page, "feed: discard stale response");
            return false;
        }

        match result {
            Ok(page) => {
                let (total, source) = match page.total {
                    Some(total) => (total, TotalSource::Fetched),
                    None => (self.options.fallback_total, TotalSource::Fallback),
                };
                tracing::debug!(
                    request_id,
                    page = request.page,
                    posts = page.posts.len(),
                    total,
                    "feed: page ready"
                );
                self.state.posts = page.posts;
                self.state.shown = Some(request);
                self.state.total = total;
                self.state.total_source = source;
                self.state.status = FeedStatus::Ready;
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(request_id, page = request.page, error = %message, "feed: load failed");
                self.state.status = FeedStatus::Error(message);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockPageSource, RawPage};
    use crate::post::{Author, RawPost};
    use anyhow::anyhow;
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const WAIT: Duration = Duration::from_secs(5);

    fn raw(id: &str) -> RawPost {
        RawPost {
            id: id.into(),
            author: Some(Author {
                name: "a".into(),
                ..Author::default()
            }),
            ..RawPost::default()
        }
    }

    fn ids(loader: &FeedLoader) -> Vec<String> {
        loader.posts().iter().map(|p| p.id.clone()).collect()
    }

    fn loader(source: Arc<dyn PageSource>) -> FeedLoader {
        FeedLoader::new(
            source,
            Arc::new(MediaResolver::direct()),
            LoaderOptions::default(),
        )
    }

    /// Answers each page only once the test releases it.
    struct GatedSource {
        gates: Mutex<HashMap<u32, crossbeam_channel::Receiver<()>>>,
        failing: Vec<u32>,
    }

    impl GatedSource {
        fn new(pages: &[u32]) -> (Self, HashMap<u32, crossbeam_channel::Sender<()>>) {
            let mut gates = HashMap::new();
            let mut releases = HashMap::new();
            for page in pages {
                let (tx, rx) = bounded(1);
                gates.insert(*page, rx);
                releases.insert(*page, tx);
            }
            (
                Self {
                    gates: Mutex::new(gates),
                    failing: Vec::new(),
                },
                releases,
            )
        }

        fn failing(mut self, pages: &[u32]) -> Self {
            self.failing = pages.to_vec();
            self
        }
    }

    impl PageSource for GatedSource {
        fn fetch_page(&self, request: PageRequest) -> Result<RawPage> {
            let gate = self.gates.lock().get(&request.page).cloned();
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(WAIT);
            }
            if self.failing.contains(&request.page) {
                return Err(anyhow!("archive: api error 503 Service Unavailable"));
            }
            Ok(RawPage {
                posts: vec![raw(&format!("page-{}", request.page))],
                total: None,
            })
        }
    }

    struct FailingSource;

    impl PageSource for FailingSource {
        fn fetch_page(&self, _request: PageRequest) -> Result<RawPage> {
            Err(anyhow!("archive: api error 502 Bad Gateway"))
        }
    }

    #[test]
    fn last_request_wins() {
        let (source, releases) = GatedSource::new(&[1, 2]);
        let mut loader = loader(Arc::new(source));
        assert!(loader.load(1, 10));
        assert!(loader.load(2, 10));

        releases[&2].send(()).unwrap();
        assert!(loader.poll_timeout(WAIT));
        assert_eq!(ids(&loader), vec!["page-2"]);

        releases[&1].send(()).unwrap();
        assert!(!loader.poll_timeout(Duration::from_secs(2)));
        assert_eq!(ids(&loader), vec!["page-2"]);
        assert_eq!(loader.state().shown, Some(PageRequest::new(2, 10)));
        assert_eq!(loader.state().status, FeedStatus::Ready);
    }

    #[test]
    fn late_failure_of_superseded_request_is_ignored() {
        let (source, releases) = GatedSource::new(&[1, 2]);
        let mut loader = loader(Arc::new(source.failing(&[1])));
        loader.load(1, 10);
        loader.load(2, 10);

        releases[&2].send(()).unwrap();
        assert!(loader.poll_timeout(WAIT));
        assert_eq!(loader.state().status, FeedStatus::Ready);

        releases[&1].send(()).unwrap();
        assert!(!loader.poll_timeout(Duration::from_secs(2)));
        assert_eq!(loader.state().status, FeedStatus::Ready);
        assert_eq!(ids(&loader), vec!["page-2"]);
    }

    #[test]
    fn same_request_is_fetched_once() {
        let source = Arc::new(MockPageSource::new(vec![raw("1"), raw("2")]));
        let mut loader = loader(source.clone());
        assert!(loader.load(1, 10));
        assert!(!loader.load(1, 10));
        assert!(loader.poll_timeout(WAIT));
        assert!(!loader.load(1, 10));
        assert_eq!(source.requests().len(), 1);
        assert_eq!(ids(&loader), vec!["1", "2"]);
        assert_eq!(loader.state().total, 2);
        assert_eq!(loader.state().total_source, TotalSource::Fetched);
    }

    #[test]
    fn reload_refetches_latest() {
        let source = Arc::new(MockPageSource::new(vec![raw("1")]));
        let mut loader = loader(source.clone());
        assert!(!loader.reload());
        loader.load(1, 10);
        loader.poll_timeout(WAIT);
        assert!(loader.reload());
        loader.poll_timeout(WAIT);
        assert_eq!(source.requests().len(), 2);
    }

    #[test]
    fn failure_keeps_previous_posts() {
        let mut loader = loader(Arc::new(MockPageSource::new(vec![raw("1")])));
        loader.load(1, 10);
        loader.poll_timeout(WAIT);
        assert_eq!(ids(&loader), vec!["1"]);

        loader.source = Arc::new(FailingSource);
        loader.load(2, 10);
        assert!(loader.is_loading());
        assert!(loader.poll_timeout(WAIT));
        assert!(matches!(loader.state().status, FeedStatus::Error(ref msg) if msg.contains("502")));
        assert_eq!(ids(&loader), vec!["1"]);
        assert_eq!(loader.state().shown, Some(PageRequest::new(1, 10)));
    }

    #[test]
    fn fallback_total_when_backend_omits_it() {
        let (source, releases) = GatedSource::new(&[]);
        drop(releases);
        let mut loader = loader(Arc::new(source));
        loader.load(1, 10);
        loader.poll_timeout(WAIT);
        assert_eq!(loader.state().total, DEFAULT_FALLBACK_TOTAL);
        assert_eq!(loader.state().total_source, TotalSource::Fallback);
        assert_eq!(loader.page_count(10), 50);
    }

    #[test]
    fn drops_hidden_and_authorless_posts() {
        let mut hidden = raw("hidden");
        hidden.visibility_scope = 2;
        let mut orphan = raw("orphan");
        orphan.author = None;
        let source = Arc::new(MockPageSource::new(vec![raw("1"), hidden, orphan, raw("2")]));
        let mut loader = loader(source);
        loader.load(1, 10);
        loader.poll_timeout(WAIT);
        assert_eq!(ids(&loader), vec!["1", "2"]);
    }
}
