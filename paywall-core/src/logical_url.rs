//! Deterministic capability URI builder.
//!
//! The logical URL is a stable identifier, not a location: the facilitator
//! uses it to route entitlement lookups, and it is a pure function of its
//! inputs so that reordering argument keys never changes the result.

use std::collections::BTreeMap;

use crate::types::HandlerKind;

/// Builds `mcp://<server>/<kind>s/<name>?<sorted-args>` for a tool/resource/
/// prompt call.
///
/// `args` is serialized as a stable, sorted, URL-encoded query string so the
/// same logical call always produces the same URL regardless of key order.
#[must_use]
pub fn build(server_name: &str, kind: HandlerKind, name: &str, args: &BTreeMap<String, String>) -> String {
    let mut url = format!("mcp://{server_name}/{}/{name}", kind.url_segment());
    append_query(&mut url, args);
    url
}

/// Builds `mcp://<server>/meta/<method>` for a meta (non tool/resource/
/// prompt) MCP method.
#[must_use]
pub fn build_meta(server_name: &str, method: &str, args: &BTreeMap<String, String>) -> String {
    let mut url = format!("mcp://{server_name}/meta/{method}");
    append_query(&mut url, args);
    url
}

fn append_query(url: &mut String, args: &BTreeMap<String, String>) {
    if args.is_empty() {
        return;
    }
    url.push('?');
    let mut first = true;
    for (key, value) in args {
        if !first {
            url.push('&');
        }
        first = false;
        url.push_str(&urlencode(key));
        url.push('=');
        url.push_str(&urlencode(value));
    }
}

fn urlencode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_url_has_plural_segment() {
        let args = BTreeMap::new();
        let url = build("srv", HandlerKind::Tool, "echo", &args);
        assert_eq!(url, "mcp://srv/tools/echo");
    }

    #[test]
    fn resource_url_has_plural_segment() {
        let args = BTreeMap::new();
        let url = build("srv", HandlerKind::Resource, "weather", &args);
        assert_eq!(url, "mcp://srv/resources/weather");
    }

    #[test]
    fn query_is_sorted_regardless_of_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("city".to_owned(), "London".to_owned());
        a.insert("units".to_owned(), "metric".to_owned());

        let mut b = BTreeMap::new();
        b.insert("units".to_owned(), "metric".to_owned());
        b.insert("city".to_owned(), "London".to_owned());

        let url_a = build("srv", HandlerKind::Tool, "weather", &a);
        let url_b = build("srv", HandlerKind::Tool, "weather", &b);
        assert_eq!(url_a, url_b);
        assert_eq!(url_a, "mcp://srv/tools/weather?city=London&units=metric");
    }

    #[test]
    fn meta_url_uses_meta_segment() {
        let args = BTreeMap::new();
        let url = build_meta("srv", "initialize", &args);
        assert_eq!(url, "mcp://srv/meta/initialize");
    }
}
