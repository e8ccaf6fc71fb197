use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use url::Url;

use crate::post::{ImageEntry, ImageLink};

/// How a deployment addresses archived media. A deployment uses exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaScheme {
    /// Lookup entries already carry external URLs.
    Direct,
    /// `<resource>?key=<archive key>` for images and video alike.
    ResourceKey { resource: String },
    /// `<image>/<id>[-thumb].jpg` and `<video>/<token>`.
    ImagePath { image: String, video: String },
}

#[derive(Debug, Clone)]
enum Strategy {
    Direct,
    ResourceKey { endpoint: Url },
    ImagePath { image: Url, video: Url },
}

/// Maps media references to fetchable URLs. Holds only the resolved endpoint
/// templates, so every call is a pure function of its arguments.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    strategy: Strategy,
}

impl MediaResolver {
    pub fn new(base: &Url, scheme: &MediaScheme) -> Result<Self> {
        let strategy = match scheme {
            MediaScheme::Direct => Strategy::Direct,
            MediaScheme::ResourceKey { resource } => Strategy::ResourceKey {
                endpoint: endpoint(base, resource)?,
            },
            MediaScheme::ImagePath { image, video } => Strategy::ImagePath {
                image: endpoint(base, image)?,
                video: endpoint(base, video)?,
            },
        };
        Ok(Self { strategy })
    }

    pub fn direct() -> Self {
        Self {
            strategy: Strategy::Direct,
        }
    }

    /// Resolves `ids` in order. Ids missing from `lookup` are skipped.
    pub fn resolve_images(
        &self,
        ids: &[String],
        lookup: &HashMap<String, ImageEntry>,
    ) -> Vec<ImageLink> {
        ids.iter()
            .filter_map(|id| {
                let entry = lookup.get(id)?;
                self.resolve_image(id, entry)
            })
            .collect()
    }

    pub fn resolve_video(&self, video_ref: Option<&str>) -> Option<String> {
        let token = video_ref.map(str::trim).filter(|token| !token.is_empty())?;
        match &self.strategy {
            Strategy::Direct => Some(token.to_string()),
            Strategy::ResourceKey { endpoint } => Some(with_key(endpoint, token)),
            Strategy::ImagePath { video, .. } => with_segment(video, token),
        }
    }

    fn resolve_image(&self, id: &str, entry: &ImageEntry) -> Option<ImageLink> {
        match &self.strategy {
            Strategy::Direct => {
                let (thumb, origin) = entry_forms(entry)?;
                Some(ImageLink {
                    thumbnail_url: thumb.to_string(),
                    origin_url: origin.to_string(),
                })
            }
            Strategy::ResourceKey { endpoint } => {
                let (thumb, origin) = entry_forms(entry)?;
                Some(ImageLink {
                    thumbnail_url: with_key(endpoint, thumb),
                    origin_url: with_key(endpoint, origin),
                })
            }
            Strategy::ImagePath { image, .. } => {
                let origin = with_segment(image, &format!("{id}.jpg"))?;
                let thumbnail = if entry.thumb.trim().is_empty() {
                    origin.clone()
                } else {
                    with_segment(image, &format!("{id}-thumb.jpg"))?
                };
                Some(ImageLink {
                    thumbnail_url: thumbnail,
                    origin_url: origin,
                })
            }
        }
    }
}

// Thumbnails are optional in the archive; the origin stands in for a missing one.
fn entry_forms(entry: &ImageEntry) -> Option<(&str, &str)> {
    let thumb = entry.thumb.trim();
    let origin = entry.origin.trim();
    match (thumb.is_empty(), origin.is_empty()) {
        (true, true) => None,
        (false, true) => Some((thumb, thumb)),
        (true, false) => Some((origin, origin)),
        (false, false) => Some((thumb, origin)),
    }
}

fn endpoint(base: &Url, template: &str) -> Result<Url> {
    let template = template.trim();
    if template.is_empty() {
        bail!("media: endpoint template required");
    }
    let url = base
        .join(template)
        .with_context(|| format!("media: invalid endpoint {template:?}"))?;
    if url.cannot_be_a_base() {
        bail!("media: endpoint {url} cannot carry a path");
    }
    Ok(url)
}

fn with_key(endpoint: &Url, key: &str) -> String {
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("key", key);
    url.to_string()
}

fn with_segment(endpoint: &Url, segment: &str) -> Option<String> {
    let mut url = endpoint.clone();
    url.path_segments_mut().ok()?.pop_if_empty().push(segment);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://archive.test:8080/").unwrap()
    }

    fn lookup(entries: &[(&str, &str, &str)]) -> HashMap<String, ImageEntry> {
        entries
            .iter()
            .map(|(id, thumb, origin)| (id.to_string(), ImageEntry::new(*thumb, *origin)))
            .collect()
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn direct_passes_urls_through() {
        let resolver = MediaResolver::direct();
        let images = resolver.resolve_images(
            &ids(&["a"]),
            &lookup(&[("a", "https://cdn.test/t.jpg", "https://cdn.test/o.jpg")]),
        );
        assert_eq!(
            images,
            vec![ImageLink {
                thumbnail_url: "https://cdn.test/t.jpg".into(),
                origin_url: "https://cdn.test/o.jpg".into(),
            }]
        );
    }

    #[test]
    fn missing_ids_are_dropped_and_order_kept() {
        let resolver = MediaResolver::direct();
        let images = resolver.resolve_images(
            &ids(&["y", "x", "z"]),
            &lookup(&[("x", "tx", "ox"), ("z", "tz", "oz")]),
        );
        let origins: Vec<_> = images.iter().map(|i| i.origin_url.as_str()).collect();
        assert_eq!(origins, vec!["ox", "oz"]);
    }

    #[test]
    fn resource_key_scheme_builds_query() {
        let scheme = MediaScheme::ResourceKey {
            resource: "/resource".into(),
        };
        let resolver = MediaResolver::new(&base(), &scheme).unwrap();
        let images = resolver.resolve_images(&ids(&["a"]), &lookup(&[("a", "a-thumb", "a")]));
        assert_eq!(
            images[0].thumbnail_url,
            "http://archive.test:8080/resource?key=a-thumb"
        );
        assert_eq!(images[0].origin_url, "http://archive.test:8080/resource?key=a");
        assert_eq!(
            resolver.resolve_video(Some("v 1")).as_deref(),
            Some("http://archive.test:8080/resource?key=v+1")
        );
    }

    #[test]
    fn image_path_scheme_builds_paths() {
        let scheme = MediaScheme::ImagePath {
            image: "/api/image".into(),
            video: "/api/video/".into(),
        };
        let resolver = MediaResolver::new(&base(), &scheme).unwrap();
        let images = resolver.resolve_images(&ids(&["p1"]), &lookup(&[("p1", "k", "k")]));
        assert_eq!(
            images[0].thumbnail_url,
            "http://archive.test:8080/api/image/p1-thumb.jpg"
        );
        assert_eq!(images[0].origin_url, "http://archive.test:8080/api/image/p1.jpg");
        assert_eq!(
            resolver.resolve_video(Some("tok")).as_deref(),
            Some("http://archive.test:8080/api/video/tok")
        );
    }

    #[test]
    fn image_path_without_stored_thumb_uses_origin() {
        let scheme = MediaScheme::ImagePath {
            image: "/api/image".into(),
            video: "/api/video".into(),
        };
        let resolver = MediaResolver::new(&base(), &scheme).unwrap();
        let images = resolver.resolve_images(&ids(&["p1"]), &lookup(&[("p1", "", "p1")]));
        assert_eq!(images[0].thumbnail_url, images[0].origin_url);
    }

    #[test]
    fn entry_without_any_form_is_skipped() {
        let resolver = MediaResolver::direct();
        let images = resolver.resolve_images(&ids(&["a"]), &lookup(&[("a", "", " ")]));
        assert!(images.is_empty());
    }

    #[test]
    fn absent_video_stays_absent() {
        let resolver = MediaResolver::direct();
        assert_eq!(resolver.resolve_video(None), None);
        assert_eq!(resolver.resolve_video(Some("  ")), None);
    }

    #[test]
    fn rejects_empty_endpoint() {
        let scheme = MediaScheme::ResourceKey {
            resource: " ".into(),
        };
        assert!(MediaResolver::new(&base(), &scheme).is_err());
    }
}
