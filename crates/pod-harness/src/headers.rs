//! Parsing of protocol response headers: `Link` and `WAC-Allow`.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, LINK};

/// The `acl` link relation locating a resource's access-control document.
pub const ACL_REL: &str = "acl";

/// The ACP relation also used to locate an access-control document.
pub const ACP_ACCESS_CONTROL: &str = "http://www.w3.org/ns/solid/acp#accessControl";

/// Name of the Web Access Control permissions header.
pub const WAC_ALLOW: &str = "wac-allow";

static LINK_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<([^>]*)>\s*(.*)$").expect("valid link regex"));

// Group pattern tolerates unquoted single-token values as some servers emit.
static WAC_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\w+)\s*=\s*"?\s*((?:\s*[^",\s]+)*)\s*"?"#).expect("valid wac-allow regex")
});

/// One parsed `Link` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHeader {
    /// Target IRI, as written (possibly relative).
    pub uri: String,
    /// Relation type.
    pub rel: String,
    /// Optional `title` parameter.
    pub title: Option<String>,
    /// Optional `type` parameter.
    pub media_type: Option<String>,
}

impl LinkHeader {
    /// Whether this link locates an access-control document (WAC `acl`
    /// relation or the ACP equivalent).
    #[must_use]
    pub fn is_acl(&self) -> bool {
        self.rel.split_whitespace().any(|rel| rel == ACL_REL || rel == ACP_ACCESS_CONTROL)
    }
}

/// Parse all `Link` headers into `{uri, rel, title?, type?}` tuples.
///
/// Handles both multi-instance headers and several links comma-joined into a
/// single instance; commas inside quoted parameters do not split a link.
#[must_use]
pub fn parse_link_headers(headers: &HeaderMap) -> Vec<LinkHeader> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(split_link_values)
        .filter_map(|value| parse_link_value(&value))
        .collect()
}

/// Find the access-control link among parsed links.
#[must_use]
pub fn find_acl_link(links: &[LinkHeader]) -> Option<&LinkHeader> {
    links.iter().find(|link| link.is_acl())
}

/// Parse a `WAC-Allow` header into permission tokens per principal group.
///
/// The `user` and `public` groups are always present, empty when the header
/// omits them; unknown groups are added dynamically. A missing header yields
/// empty sets for the known groups rather than an error.
#[must_use]
pub fn parse_wac_allow(headers: &HeaderMap) -> HashMap<String, HashSet<String>> {
    let mut permissions: HashMap<String, HashSet<String>> = HashMap::new();
    permissions.insert("user".to_string(), HashSet::new());
    permissions.insert("public".to_string(), HashSet::new());

    let Some(value) = headers.get(WAC_ALLOW).and_then(|v| v.to_str().ok()) else {
        tracing::warn!("WAC-Allow header missing");
        return permissions;
    };

    for capture in WAC_GROUP.captures_iter(value) {
        let group = capture[1].to_string();
        let tokens = permissions.entry(group).or_default();
        for token in capture[2].split_whitespace() {
            tokens.insert(token.to_lowercase());
        }
    }
    permissions
}

// A link list may arrive as one comma-joined header instance. Split on commas
// that start a new `<uri>` element, keeping commas inside parameters intact.
fn split_link_values(value: &str) -> Vec<String> {
    let mut values = Vec::new();
    for piece in value.split(',') {
        match values.last_mut() {
            Some(previous) if !piece.trim_start().starts_with('<') => {
                *previous = format!("{previous},{piece}");
            }
            _ => values.push(piece.to_string()),
        }
    }
    values
}

fn parse_link_value(value: &str) -> Option<LinkHeader> {
    let capture = LINK_VALUE.captures(value)?;
    let uri = capture[1].to_string();
    let mut rel = None;
    let mut title = None;
    let mut media_type = None;

    for param in capture[2].split(';') {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let parsed = raw.trim().trim_matches('"').to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "rel" => rel = Some(parsed),
            "title" => title = Some(parsed),
            "type" => media_type = Some(parsed),
            _ => {}
        }
    }

    Some(LinkHeader { uri, rel: rel.unwrap_or_default(), title, media_type })
}
