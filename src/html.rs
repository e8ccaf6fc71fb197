use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::post::HtmlFragment;

static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break pattern"));
static IMG_ALT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\balt\s*=\s*["']([^"']*)["'][^>]*>"#).expect("img pattern")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("entity pattern"));

/// Renders a stored fragment as terminal text. Line breaks survive, emoji
/// images become their alt text, and other tags are dropped.
pub fn to_plain_text(fragment: &HtmlFragment) -> String {
    let text = LINE_BREAK.replace_all(fragment.as_str(), "\n");
    let text = IMG_ALT.replace_all(&text, "$1");
    let text = TAG.replace_all(&text, "");
    let text = ENTITY.replace_all(&text, |caps: &Captures<'_>| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    text.trim().to_string()
}

fn decode_entity(name: &str) -> Option<String> {
    if let Some(code) = name.strip_prefix('#') {
        let value = match code.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => code.parse::<u32>().ok()?,
        };
        return char::from_u32(value).map(String::from);
    }
    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        _ => return None,
    };
    Some(decoded.to_string())
}
