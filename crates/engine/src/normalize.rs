//! Collapses request URLs into bounded endpoint patterns.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("static uuid regex")
});

static NUMERIC_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("static numeric regex"));

static HASH_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{9,}$").expect("static hash regex"));

pub const QUERY_MARKER: &str = "?...";

/// Replaces UUID, numeric and long-hex path segments with `{uuid}`, `{id}` and
/// `{hash}`, drops the query string in favour of a single `?...` marker, and
/// drops fragments and credentials. Inputs that do not parse as absolute URLs
/// get the same treatment applied to the raw text.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) if url.has_host() => {
            let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
            if let Some(port) = url.port() {
                out.push_str(&format!(":{port}"));
            }
            out.push_str(&normalize_path(url.path()));
            if url.query().is_some() {
                out.push_str(QUERY_MARKER);
            }
            out
        }
        _ => normalize_raw(raw),
    }
}

fn normalize_raw(raw: &str) -> String {
    let without_fragment = raw.split_once('#').map_or(raw, |(head, _)| head);
    match without_fragment.split_once('?') {
        Some((path, _)) => format!("{}{QUERY_MARKER}", normalize_path(path)),
        None => normalize_path(without_fragment),
    }
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(normalize_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_segment(segment: &str) -> &str {
    if UUID_SEGMENT.is_match(segment) {
        "{uuid}"
    } else if NUMERIC_SEGMENT.is_match(segment) {
        "{id}"
    } else if HASH_SEGMENT.is_match(segment) {
        "{hash}"
    } else {
        segment
    }
}
