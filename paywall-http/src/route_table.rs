//! Route table for the x402-HTTP payment gate: maps `"METHOD /path"` keys,
//! with `:name` single-segment wildcards, to the plan and pricing a request
//! matching that route must pay against.

use std::collections::HashMap;

use serde::Deserialize;

/// Configuration attached to a single protected route.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// The plan this route bills against.
    pub plan_id: String,
    /// Fixed credit cost for a call against this route. Defaults to `1`.
    #[serde(default)]
    pub credits: Option<u64>,
    /// The agent that owns this endpoint, overriding the gate's default.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Network identifier to advertise in the `payment-required` challenge.
    #[serde(default)]
    pub network: Option<String>,
}

/// A table of protected routes keyed by `"METHOD /path"`, matched against
/// incoming requests with `:name` wildcard segments.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, Vec<Segment>, RouteConfig)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

impl RouteTable {
    /// Builds a route table from `"METHOD /path"` keys.
    #[must_use]
    pub fn new(routes: HashMap<String, RouteConfig>) -> Self {
        let routes = routes
            .into_iter()
            .filter_map(|(key, config)| {
                let (method, path) = key.split_once(' ')?;
                Some((method.to_ascii_uppercase(), parse_segments(path), config))
            })
            .collect();
        Self { routes }
    }

    /// Finds the route configuration matching `method`/`path`, if any.
    #[must_use]
    pub fn match_route(&self, method: &str, path: &str) -> Option<&RouteConfig> {
        let method = method.to_ascii_uppercase();
        let candidate = parse_segments(path);
        self.routes
            .iter()
            .find(|(m, segments, _)| *m == method && segments_match(segments, &candidate))
            .map(|(_, _, config)| config)
    }
}

fn parse_segments(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                let _ = name;
                Segment::Wildcard
            } else {
                Segment::Literal(segment.to_owned())
            }
        })
        .collect()
}

fn segments_match(pattern: &[Segment], candidate: &[Segment]) -> bool {
    if pattern.len() != candidate.len() {
        return false;
    }
    pattern.iter().zip(candidate).all(|(p, c)| match p {
        Segment::Wildcard => true,
        Segment::Literal(name) => match c {
            Segment::Literal(other) => name == other,
            Segment::Wildcard => false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(plan_id: &str) -> RouteConfig {
        RouteConfig { plan_id: plan_id.to_owned(), credits: None, agent_id: None, network: None }
    }

    #[test]
    fn matches_literal_route() {
        let table = RouteTable::new(HashMap::from([("GET /weather".to_owned(), route("p1"))]));
        assert!(table.match_route("GET", "/weather").is_some());
        assert!(table.match_route("POST", "/weather").is_none());
        assert!(table.match_route("GET", "/other").is_none());
    }

    #[test]
    fn matches_single_segment_wildcard() {
        let table = RouteTable::new(HashMap::from([("GET /agents/:id/data".to_owned(), route("p1"))]));
        assert!(table.match_route("GET", "/agents/abc/data").is_some());
        assert!(table.match_route("GET", "/agents/abc/extra/data").is_none());
    }

    #[test]
    fn method_is_matched_case_insensitively() {
        let table = RouteTable::new(HashMap::from([("get /x".to_owned(), route("p1"))]));
        assert!(table.match_route("GET", "/x").is_some());
    }
}
