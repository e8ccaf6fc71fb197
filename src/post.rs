use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Markup exactly as the archive stored it. Sanitizing is the renderer's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HtmlFragment(String);

impl HtmlFragment {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for HtmlFragment {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for HtmlFragment {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for HtmlFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Author {
    #[serde(rename = "screen_name", default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "profile_image_url", default, deserialize_with = "lenient_string")]
    pub avatar_url: String,
    #[serde(rename = "id", default, deserialize_with = "lenient_string")]
    pub external_id: String,
}

/// One archived image. Each form is either an external URL or an archive key,
/// depending on how the archive was synced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub thumb: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub origin: String,
}

impl ImageEntry {
    pub fn new<T: Into<String>, O: Into<String>>(thumb: T, origin: O) -> Self {
        Self {
            thumb: thumb.into(),
            origin: origin.into(),
        }
    }
}

/// A post as received from the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WirePost")]
pub struct RawPost {
    pub id: String,
    pub permalink_id: Option<String>,
    pub author: Option<Author>,
    pub created_at: String,
    pub text: HtmlFragment,
    pub image_ids: Vec<String>,
    pub image_lookup: HashMap<String, ImageEntry>,
    pub video_ref: Option<String>,
    pub quoted: Option<Box<RawPost>>,
    pub visibility_scope: i64,
}

impl RawPost {
    /// The post that owns images and video: the retweeted original when there
    /// is one, otherwise the post itself.
    pub fn media_owner(&self) -> &RawPost {
        self.quoted.as_deref().unwrap_or(self)
    }

    pub fn is_default_list(&self) -> bool {
        self.visibility_scope == 0
    }
}

// Every field decodes leniently: an odd value degrades to the default for
// that field and the rest of the record survives.
#[derive(Deserialize)]
struct WirePost {
    #[serde(default, deserialize_with = "lenient_string")]
    mid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    mblogid: String,
    #[serde(default, deserialize_with = "lenient_record")]
    user: Option<Author>,
    #[serde(default, deserialize_with = "lenient_string")]
    created_at: String,
    #[serde(default, deserialize_with = "lenient_string")]
    text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    text_raw: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pic_ids: Vec<String>,
    #[serde(default, rename = "archiveImages", deserialize_with = "lenient_lookup")]
    archive_images: HashMap<String, ImageEntry>,
    #[serde(default, rename = "archiveVideo", deserialize_with = "lenient_string")]
    archive_video: String,
    #[serde(default, deserialize_with = "lenient_record")]
    retweeted_status: Option<Box<RawPost>>,
    #[serde(default, deserialize_with = "lenient_record")]
    visible: Option<Visibility>,
}

#[derive(Deserialize)]
struct Visibility {
    #[serde(default, alias = "listId", deserialize_with = "lenient_i64")]
    list_id: i64,
}

impl From<WirePost> for RawPost {
    fn from(wire: WirePost) -> Self {
        let text = if wire.text.is_empty() {
            wire.text_raw
        } else {
            wire.text
        };
        let non_empty = |value: String| (!value.trim().is_empty()).then_some(value);
        RawPost {
            id: wire.mid,
            permalink_id: non_empty(wire.mblogid),
            author: wire.user,
            created_at: wire.created_at,
            text: HtmlFragment(text),
            image_ids: wire.pic_ids,
            image_lookup: wire.archive_images,
            video_ref: non_empty(wire.archive_video),
            quoted: wire.retweeted_status,
            visibility_scope: wire.visible.map(|v| v.list_id).unwrap_or(0),
        }
    }
}

/// Any scalar as its raw text; `null`, arrays and objects become empty.
fn scalar_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(n), _, _) => n.to_string(),
            (_, Some(n), _) => n.to_string(),
            (_, _, Some(n)) => format!("{n:.0}"),
            _ => n.to_string(),
        },
        Value::Bool(flag) => flag.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match &value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(scalar_text)
            .filter(|id| !id.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

/// A nested object that does not decode is treated as absent.
fn lenient_record<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

fn lenient_lookup<'de, D>(deserializer: D) -> Result<HashMap<String, ImageEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(entries) = Value::deserialize(deserializer)? else {
        return Ok(HashMap::new());
    };
    Ok(entries
        .into_iter()
        .filter(|(_, entry)| entry.is_object())
        .filter_map(|(id, entry)| Some((id, serde_json::from_value(entry).ok()?)))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorView {
    pub name: String,
    pub avatar_url: String,
    pub external_id: String,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageLink {
    pub thumbnail_url: String,
    pub origin_url: String,
}

/// Head block of a retweeted post. It carries no nested quote of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotedPost {
    pub id: String,
    pub author: Option<AuthorView>,
    pub created_at: String,
    pub text: HtmlFragment,
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayPost {
    pub id: String,
    pub author: Option<AuthorView>,
    pub created_at: String,
    pub text: HtmlFragment,
    pub permalink: Option<String>,
    pub quoted: Option<QuotedPost>,
    pub images: Vec<ImageLink>,
    pub video_url: Option<String>,
}
