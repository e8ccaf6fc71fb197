use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::archive;
use crate::post::{Author, HtmlFragment, ImageEntry, RawPost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub posts: Vec<RawPost>,
    pub total: Option<u64>,
}

/// "Given a page request, return a page of raw post records."
pub trait PageSource: Send + Sync {
    fn fetch_page(&self, request: PageRequest) -> Result<RawPage>;
}

pub struct ArchivePageSource {
    client: Arc<archive::Client>,
}

impl ArchivePageSource {
    pub fn new(client: Arc<archive::Client>) -> Self {
        Self { client }
    }
}

impl PageSource for ArchivePageSource {
    fn fetch_page(&self, request: PageRequest) -> Result<RawPage> {
        let response = self
            .client
            .list(request.page_size, request.offset())
            .with_context(|| format!("fetch page {}", request.page))?;
        Ok(RawPage {
            posts: response.data,
            total: response.total,
        })
    }
}

/// In-memory archive used by `--offline` and by tests.
#[derive(Default)]
pub struct MockPageSource {
    posts: Vec<RawPost>,
    requests: Mutex<Vec<PageRequest>>,
}

impl MockPageSource {
    pub fn new(posts: Vec<RawPost>) -> Self {
        Self {
            posts,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn sample() -> Self {
        Self::new(sample_posts(37))
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }
}

impl PageSource for MockPageSource {
    fn fetch_page(&self, request: PageRequest) -> Result<RawPage> {
        self.requests.lock().push(request);
        let start = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let posts = self
            .posts
            .iter()
            .skip(start)
            .take(request.page_size as usize)
            .cloned()
            .collect();
        Ok(RawPage {
            posts,
            total: Some(self.posts.len() as u64),
        })
    }
}

fn sample_author(index: usize) -> Author {
    let names = ["archivist", "lantern", "tidepool", "marginalia"];
    let name = names[index % names.len()];
    Author {
        name: name.to_string(),
        avatar_url: format!("https://avatars.invalid/{name}.jpg"),
        external_id: format!("{}", 1_000_000 + index % names.len()),
    }
}

fn sample_post(index: usize, images: usize) -> RawPost {
    let image_ids: Vec<String> = (0..images).map(|n| format!("s{index}p{n}")).collect();
    let image_lookup: HashMap<String, ImageEntry> = image_ids
        .iter()
        .map(|id| (id.clone(), ImageEntry::new(format!("{id}-thumb"), id.clone())))
        .collect();
    RawPost {
        id: format!("{}", 4_800_000_000_000_000u64 + index as u64),
        permalink_id: Some(format!("Sample{index}")),
        author: Some(sample_author(index)),
        created_at: format!("Tue Oct 11 {:02}:{:02}:00 +0800 2022", index % 24, index % 60),
        text: HtmlFragment::from(format!(
            "Sample post #{index}<br />Saved from the timeline &amp; kept offline. <img alt=\"[heart]\" src=\"x\" />"
        )),
        image_ids,
        image_lookup,
        ..RawPost::default()
    }
}

fn sample_posts(count: usize) -> Vec<RawPost> {
    (0..count)
        .map(|index| {
            let mut post = sample_post(index, index % 4);
            match index % 7 {
                3 => {
                    let mut original = sample_post(index + 1000, 3);
                    original.author = Some(sample_author(index + 1));
                    post.image_ids.clear();
                    post.image_lookup.clear();
                    post.text = HtmlFragment::from(format!("Sharing this //@{}", index + 1));
                    post.quoted = Some(Box::new(original));
                }
                5 => post.video_ref = Some(format!("video-{index}")),
                6 if index % 2 == 0 => post.visibility_scope = 1,
                _ => {}
            }
            post
        })
        .collect()
}
