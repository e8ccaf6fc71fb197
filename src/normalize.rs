use chrono::{DateTime, FixedOffset, Utc};

use crate::media::MediaResolver;
use crate::post::{Author, AuthorView, DisplayPost, QuotedPost, RawPost};

pub const PUBLIC_SITE_URL: &str = "https://weibo.com";

const ARCHIVE_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
// Larger magnitudes are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Builds the view model for one post.
///
/// The outer post always contributes its own head block. A retweeted original
/// is nested once as `quoted`; anything it quotes in turn is not expanded.
/// Images and video come from the original when there is one, since a retweet
/// carries no media of its own. Missing optional fields degrade to empty or
/// absent values; this never fails.
pub fn normalize(raw: &RawPost, resolver: &MediaResolver) -> DisplayPost {
    let owner = raw.media_owner();
    DisplayPost {
        id: raw.id.clone(),
        author: raw.author.as_ref().map(author_view),
        created_at: display_time(&raw.created_at),
        text: raw.text.clone(),
        permalink: permalink(raw),
        quoted: raw.quoted.as_deref().map(quoted_head),
        images: resolver.resolve_images(&owner.image_ids, &owner.image_lookup),
        video_url: resolver.resolve_video(owner.video_ref.as_deref()),
    }
}

/// Runs one fetched page through the feed pipeline: default-list filter (when
/// the backend has not applied it), normalization, then removal of posts that
/// have no author block.
pub fn normalize_page(
    raws: &[RawPost],
    resolver: &MediaResolver,
    filter_visibility: bool,
) -> Vec<DisplayPost> {
    raws.iter()
        .filter(|raw| !filter_visibility || raw.is_default_list())
        .map(|raw| normalize(raw, resolver))
        .filter(|post| post.author.is_some())
        .collect()
}

fn quoted_head(raw: &RawPost) -> QuotedPost {
    QuotedPost {
        id: raw.id.clone(),
        author: raw.author.as_ref().map(author_view),
        created_at: display_time(&raw.created_at),
        text: raw.text.clone(),
        permalink: permalink(raw),
    }
}

fn author_view(author: &Author) -> AuthorView {
    let external_id = author.external_id.trim();
    AuthorView {
        name: author.name.clone(),
        avatar_url: author.avatar_url.clone(),
        external_id: external_id.to_string(),
        profile_url: (!external_id.is_empty())
            .then(|| format!("{PUBLIC_SITE_URL}/u/{external_id}")),
    }
}

fn permalink(raw: &RawPost) -> Option<String> {
    let author_id = raw.author.as_ref()?.external_id.trim();
    let post_id = raw.permalink_id.as_deref()?.trim();
    if author_id.is_empty() || post_id.is_empty() {
        return None;
    }
    Some(format!("{PUBLIC_SITE_URL}/{author_id}/{post_id}"))
}

/// Formats an archive timestamp for display, keeping the post's own offset.
/// Bare epoch seconds (or milliseconds) are shown in UTC. Unrecognised input
/// is returned unchanged.
pub fn display_time(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match parse_time(trimmed) {
        Some(parsed) => parsed.format(DISPLAY_TIME_FORMAT).to_string(),
        None => raw.to_string(),
    }
}

fn parse_time(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value, ARCHIVE_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .or_else(|| parse_epoch(value))
}

fn parse_epoch(value: &str) -> Option<DateTime<FixedOffset>> {
    let number: i64 = value.parse().ok()?;
    let parsed = if number.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::<Utc>::from_timestamp_millis(number)?
    } else {
        DateTime::<Utc>::from_timestamp(number, 0)?
    };
    Some(parsed.fixed_offset())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::media::MediaScheme;
    use crate::post::{HtmlFragment, ImageEntry, ImageLink};
    use url::Url;

    fn author(name: &str) -> Option<Author> {
        Some(Author {
            name: name.into(),
            avatar_url: format!("https://cdn.test/{name}.jpg"),
            external_id: format!("{name}-id"),
        })
    }

    fn post(id: &str, images: &[&str]) -> RawPost {
        RawPost {
            id: id.into(),
            author: author("a"),
            created_at: "Tue Oct 11 10:00:00 +0800 2022".into(),
            text: HtmlFragment::from(format!("text {id}")),
            image_ids: images.iter().map(|i| i.to_string()).collect(),
            image_lookup: images
                .iter()
                .map(|i| (i.to_string(), ImageEntry::new(format!("t-{i}"), format!("o-{i}"))))
                .collect(),
            ..RawPost::default()
        }
    }

    #[test]
    fn normalization_is_repeatable() {
        let mut raw = post("2", &["c"]);
        raw.quoted = Some(Box::new(post("1", &["a", "b"])));
        raw.video_ref = Some("v".into());
        let resolver = MediaResolver::direct();
        assert_eq!(normalize(&raw, &resolver), normalize(&raw, &resolver));
    }

    #[test]
    fn media_belongs_to_quoted_post() {
        let mut raw = post("2", &["c"]);
        raw.video_ref = Some("own-video".into());
        let mut original = post("1", &["a", "b"]);
        original.video_ref = Some("original-video".into());
        raw.quoted = Some(Box::new(original));

        let display = normalize(&raw, &MediaResolver::direct());
        let origins: Vec<_> = display.images.iter().map(|i| i.origin_url.as_str()).collect();
        assert_eq!(origins, vec!["o-a", "o-b"]);
        assert_eq!(display.video_url.as_deref(), Some("original-video"));
        assert_eq!(display.text.as_str(), "text 2");
        assert_eq!(display.quoted.as_ref().unwrap().text.as_str(), "text 1");
    }

    #[test]
    fn nested_quotes_are_flattened() {
        let mut middle = post("1", &["a"]);
        middle.quoted = Some(Box::new(post("0", &["deep"])));
        let mut raw = post("2", &[]);
        raw.quoted = Some(Box::new(middle));

        let display = normalize(&raw, &MediaResolver::direct());
        let quoted = display.quoted.unwrap();
        assert_eq!(quoted.id, "1");
        let origins: Vec<_> = display.images.iter().map(|i| i.origin_url.as_str()).collect();
        assert_eq!(origins, vec!["o-a"]);
    }

    #[test]
    fn single_post_end_to_end() {
        let raw = RawPost {
            id: "1".into(),
            author: author("a"),
            image_ids: vec!["i1".into()],
            image_lookup: HashMap::from([("i1".to_string(), ImageEntry::new("t1", "o1"))]),
            ..RawPost::default()
        };
        let scheme = MediaScheme::ResourceKey {
            resource: "/resource".into(),
        };
        let resolver =
            MediaResolver::new(&Url::parse("http://archive.test/").unwrap(), &scheme).unwrap();
        let display = normalize(&raw, &resolver);
        assert_eq!(display.id, "1");
        assert!(display.quoted.is_none());
        assert_eq!(
            display.images,
            vec![ImageLink {
                thumbnail_url: "http://archive.test/resource?key=t1".into(),
                origin_url: "http://archive.test/resource?key=o1".into(),
            }]
        );
        assert_eq!(display.created_at, "");
    }

    #[test]
    fn retweet_without_own_media_uses_original() {
        let mut raw = post("2", &[]);
        raw.quoted = Some(Box::new(post("1", &["i1"])));
        let display = normalize(&raw, &MediaResolver::direct());
        assert_eq!(
            display.images,
            vec![ImageLink {
                thumbnail_url: "t-i1".into(),
                origin_url: "o-i1".into(),
            }]
        );
    }

    #[test]
    fn formats_archive_timestamps() {
        assert_eq!(
            display_time("Tue Oct 11 10:00:00 +0800 2022"),
            "2022-10-11 10:00:00"
        );
        assert_eq!(display_time("2022-10-11T02:00:00Z"), "2022-10-11 02:00:00");
        assert_eq!(display_time("yesterday-ish"), "yesterday-ish");
        assert_eq!(display_time("1665453600"), "2022-10-11 02:00:00");
        assert_eq!(display_time("1665453600000"), "2022-10-11 02:00:00");
    }

    #[test]
    fn builds_links_from_author_and_post_ids() {
        let mut raw = post("1", &[]);
        raw.permalink_id = Some("Mxyz".into());
        let display = normalize(&raw, &MediaResolver::direct());
        assert_eq!(
            display.permalink.as_deref(),
            Some("https://weibo.com/a-id/Mxyz")
        );
        assert_eq!(
            display.author.unwrap().profile_url.as_deref(),
            Some("https://weibo.com/u/a-id")
        );
    }

    #[test]
    fn missing_author_survives_normalize_but_not_page() {
        let mut orphan = post("9", &[]);
        orphan.author = None;
        let resolver = MediaResolver::direct();
        assert!(normalize(&orphan, &resolver).author.is_none());

        let page = normalize_page(&[post("1", &[]), orphan], &resolver, true);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "1");
    }

    #[test]
    fn page_filter_keeps_default_list_only() {
        let mut hidden = post("2", &[]);
        hidden.visibility_scope = 1;
        let raws = vec![post("1", &[]), hidden];
        let resolver = MediaResolver::direct();
        assert_eq!(normalize_page(&raws, &resolver, true).len(), 1);
        assert_eq!(normalize_page(&raws, &resolver, false).len(), 2);
    }
}
