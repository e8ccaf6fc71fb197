use std::collections::HashSet;
use std::time::{Duration, Instant};

use url::Url;

pub const PAGE_PARAM: &str = "page";

/// In level mode, a press arriving sooner than this after the previous press
/// of the same key is taken as auto-repeat. Kept below common first-repeat
/// delays.
pub const LEVEL_REPEAT_GAP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKey {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    Press,
    Repeat,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: PageKey,
    pub phase: KeyPhase,
}

impl KeyInput {
    pub fn press(key: PageKey) -> Self {
        Self {
            key,
            phase: KeyPhase::Press,
        }
    }

    pub fn repeat(key: PageKey) -> Self {
        Self {
            key,
            phase: KeyPhase::Repeat,
        }
    }

    pub fn release(key: PageKey) -> Self {
        Self {
            key,
            phase: KeyPhase::Release,
        }
    }
}

/// Whether the input source reports key releases. Without releases presses
/// are spaced out by [`LEVEL_REPEAT_GAP`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyTrigger {
    #[default]
    Edge,
    Level,
}

/// Parses a `page` query value. Absent, non-numeric or non-positive input
/// resolves to page 1.
pub fn parse_page(value: Option<&str>) -> u32 {
    value
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(clamp_page)
        .unwrap_or(1)
}

fn clamp_page(value: i64) -> u32 {
    value.clamp(1, i64::from(u32::MAX)) as u32
}

pub fn page_from_url(url: &Url) -> u32 {
    let value = url
        .query_pairs()
        .find(|(key, _)| key == PAGE_PARAM)
        .map(|(_, value)| value.into_owned());
    parse_page(value.as_deref())
}

/// Rewrites the `page` parameter of `url`, keeping every other parameter.
pub fn set_page_param(url: &mut Url, value: Option<&str>) {
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != PAGE_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.set_query(None);
    if others.is_empty() && value.is_none() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in &others {
        pairs.append_pair(key, value);
    }
    if let Some(value) = value {
        pairs.append_pair(PAGE_PARAM, value);
    }
}

/// Sole owner of the current page.
///
/// The feed location URL is the record: keyboard and pager requests are
/// written into its `page` parameter and then read back, so there is never a
/// second counter to drift from it. Back/forward history mirrors a browser's.
#[derive(Debug, Clone)]
pub struct PageController {
    location: Url,
    page: u32,
    mounted: bool,
    trigger: KeyTrigger,
    held: HashSet<PageKey>,
    last_press: Option<(PageKey, Instant)>,
    back: Vec<Url>,
    forward: Vec<Url>,
}

impl PageController {
    pub fn new(location: Url) -> Self {
        let page = page_from_url(&location);
        Self {
            location,
            page,
            mounted: false,
            trigger: KeyTrigger::default(),
            held: HashSet::new(),
            last_press: None,
            back: Vec::new(),
            forward: Vec::new(),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn trigger(&self) -> KeyTrigger {
        self.trigger
    }

    pub fn set_trigger(&mut self, trigger: KeyTrigger) {
        self.trigger = trigger;
        self.held.clear();
        self.last_press = None;
    }

    pub fn offset(&self, page_size: u32) -> u64 {
        u64::from(self.page - 1) * u64::from(page_size)
    }

    /// Attaches the feed view. The page is derived from the URL once here;
    /// mounting twice changes nothing and returns `false`.
    pub fn mount(&mut self) -> bool {
        if self.mounted {
            return false;
        }
        self.mounted = true;
        self.held.clear();
        self.last_press = None;
        self.observe();
        true
    }

    /// Detaches the feed view, dropping held keys and history.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.held.clear();
        self.last_press = None;
        self.back.clear();
        self.forward.clear();
    }

    /// An external change of the location, e.g. a new URL typed in.
    pub fn on_location_changed(&mut self, location: Url) -> bool {
        if location != self.location {
            self.forward.clear();
            self.back
                .push(std::mem::replace(&mut self.location, location));
        }
        self.observe()
    }

    /// The `page` parameter was observed with `value` (`None` when absent).
    pub fn on_url_param_observed(&mut self, value: Option<&str>) -> bool {
        set_page_param(&mut self.location, value);
        self.observe()
    }

    pub fn on_key(&mut self, input: KeyInput) -> bool {
        self.on_key_at(input, Instant::now())
    }

    /// [`PageController::on_key`] with an explicit arrival time.
    pub fn on_key_at(&mut self, input: KeyInput, now: Instant) -> bool {
        if !self.mounted {
            return false;
        }
        match input.phase {
            KeyPhase::Release => {
                self.held.remove(&input.key);
                return false;
            }
            KeyPhase::Repeat => return false,
            KeyPhase::Press => match self.trigger {
                KeyTrigger::Edge => {
                    if !self.held.insert(input.key) {
                        return false;
                    }
                }
                KeyTrigger::Level => {
                    let previous = self.last_press.replace((input.key, now));
                    if let Some((key, at)) = previous {
                        if key == input.key && now.saturating_duration_since(at) < LEVEL_REPEAT_GAP {
                            return false;
                        }
                    }
                }
            },
        }
        match input.key {
            PageKey::Left => self.on_key_left(),
            PageKey::Right => self.on_key_right(),
        }
    }

    pub fn on_key_right(&mut self) -> bool {
        let requested = self.page.saturating_add(1);
        self.request(requested)
    }

    pub fn on_key_left(&mut self) -> bool {
        let requested = self.page.saturating_sub(1).max(1);
        self.request(requested)
    }

    pub fn on_pager_change(&mut self, requested: i64) -> bool {
        self.request(clamp_page(requested))
    }

    pub fn back(&mut self) -> bool {
        let Some(previous) = self.back.pop() else {
            return false;
        };
        self.forward
            .push(std::mem::replace(&mut self.location, previous));
        self.observe()
    }

    pub fn forward(&mut self) -> bool {
        let Some(next) = self.forward.pop() else {
            return false;
        };
        self.back.push(std::mem::replace(&mut self.location, next));
        self.observe()
    }

    fn request(&mut self, requested: u32) -> bool {
        if !self.mounted || requested == self.page {
            return false;
        }
        let mut next = self.location.clone();
        set_page_param(&mut next, Some(&requested.to_string()));
        self.forward.clear();
        self.back.push(std::mem::replace(&mut self.location, next));
        self.observe()
    }

    fn observe(&mut self) -> bool {
        let page = page_from_url(&self.location);
        let changed = page != self.page;
        self.page = page;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(query: &str) -> PageController {
        let url = Url::parse(&format!("http://archive.test/{query}")).unwrap();
        let mut controller = PageController::new(url);
        controller.mount();
        controller
    }

    #[test]
    fn parses_and_clamps_params() {
        assert_eq!(parse_page(None), 1);
        assert_eq!(parse_page(Some("abc")), 1);
        assert_eq!(parse_page(Some("-5")), 1);
        assert_eq!(parse_page(Some("0")), 1);
        assert_eq!(parse_page(Some(" 7 ")), 7);
    }

    #[test]
    fn initial_page_comes_from_url() {
        assert_eq!(controller("?page=4").page(), 4);
        assert_eq!(controller("?page=-5").page(), 1);
        assert_eq!(controller("?page=abc").page(), 1);
        assert_eq!(controller("").page(), 1);
    }

    #[test]
    fn left_at_first_page_stays() {
        let mut c = controller("");
        assert!(!c.on_key_left());
        assert_eq!(c.page(), 1);
        assert_eq!(c.location().query(), None);
    }

    #[test]
    fn keys_write_through_the_url() {
        let mut c = controller("?tab=fav");
        assert!(c.on_key_right());
        assert_eq!(c.page(), 2);
        assert_eq!(c.location().query(), Some("tab=fav&page=2"));
        assert!(c.on_key_left());
        assert_eq!(page_from_url(c.location()), 1);
        assert_eq!(c.page(), 1);
    }

    #[test]
    fn pager_requests_are_clamped() {
        let mut c = controller("?page=3");
        assert!(c.on_pager_change(-2));
        assert_eq!(c.page(), 1);
        assert!(c.on_pager_change(9));
        assert_eq!(c.location().query(), Some("page=9"));
    }

    #[test]
    fn url_observation_overrides_keys() {
        let mut c = controller("");
        c.on_key_right();
        c.on_key_right();
        assert!(c.on_url_param_observed(Some("abc")));
        assert_eq!(c.page(), 1);
        assert!(c.on_url_param_observed(Some("5")));
        assert_eq!(c.page(), 5);
        assert!(c.on_url_param_observed(None));
        assert_eq!(c.page(), 1);
    }

    #[test]
    fn held_key_applies_once_per_press() {
        let mut c = controller("");
        assert!(c.on_key(KeyInput::press(PageKey::Right)));
        assert!(!c.on_key(KeyInput::repeat(PageKey::Right)));
        assert!(!c.on_key(KeyInput::press(PageKey::Right)));
        assert_eq!(c.page(), 2);
        c.on_key(KeyInput::release(PageKey::Right));
        assert!(c.on_key(KeyInput::press(PageKey::Right)));
        assert_eq!(c.page(), 3);
    }

    #[test]
    fn level_trigger_counts_spaced_presses() {
        let mut c = controller("");
        c.set_trigger(KeyTrigger::Level);
        let start = Instant::now();
        assert!(c.on_key_at(KeyInput::press(PageKey::Right), start));
        assert!(c.on_key_at(
            KeyInput::press(PageKey::Right),
            start + Duration::from_millis(400)
        ));
        assert_eq!(c.page(), 3);
    }

    #[test]
    fn level_trigger_swallows_auto_repeat() {
        let mut c = controller("");
        c.set_trigger(KeyTrigger::Level);
        let start = Instant::now();
        assert!(c.on_key_at(KeyInput::press(PageKey::Right), start));
        for step in 1..20u64 {
            let at = start + Duration::from_millis(30 * step);
            assert!(!c.on_key_at(KeyInput::press(PageKey::Right), at));
        }
        assert_eq!(c.page(), 2);
        // A different key is never treated as a repeat.
        assert!(c.on_key_at(
            KeyInput::press(PageKey::Left),
            start + Duration::from_millis(600)
        ));
        assert_eq!(c.page(), 1);
    }

    #[test]
    fn keys_ignored_while_unmounted() {
        let mut c = controller("?page=2");
        c.unmount();
        assert!(!c.on_key(KeyInput::press(PageKey::Right)));
        assert!(!c.on_key_left());
        assert_eq!(c.page(), 2);
    }

    #[test]
    fn mount_is_idempotent() {
        let mut c = controller("?page=2");
        assert!(!c.mount());
        c.on_key(KeyInput::press(PageKey::Right));
        assert!(!c.mount());
        assert_eq!(c.page(), 3);
        c.unmount();
        assert!(c.mount());
        assert!(c.on_key(KeyInput::press(PageKey::Right)));
        assert_eq!(c.page(), 4);
    }

    #[test]
    fn history_reobserves_url() {
        let mut c = controller("");
        c.on_key_right();
        c.on_key_right();
        assert!(c.back());
        assert_eq!(c.page(), 2);
        assert!(c.back());
        assert_eq!(c.page(), 1);
        assert!(!c.back());
        assert!(c.forward());
        assert_eq!(c.page(), 2);
        c.on_pager_change(7);
        assert!(!c.forward());
    }

    #[test]
    fn external_location_change_is_authoritative() {
        let mut c = controller("?page=2");
        let url = Url::parse("http://archive.test/?page=6").unwrap();
        assert!(c.on_location_changed(url));
        assert_eq!(c.page(), 6);
        assert_eq!(c.offset(10), 50);
    }
}
