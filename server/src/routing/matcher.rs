//! Path matching against the route table.
//!
//! # Design Decisions
//! - First registered wins: entries are tried in declaration order and never
//!   re-sorted by specificity, so a literal route declared after a colliding
//!   `:param` route is unreachable
//! - Request paths only get a leading `/` ensured; a trailing `/` yields an
//!   empty last segment that no canonical pattern matches
//! - Bound values are the raw segments, with no percent-decoding or casting;
//!   an empty segment never binds a `:param`

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use super::table::{RouteDescriptor, RouteTable, Segment};

/// Parameters bound by `:name` segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    pub route: &'a RouteDescriptor,
    pub path_params: PathParams,
}

#[derive(Debug, Clone)]
pub enum RouteMatch<'a> {
    /// Fully literal pattern, nothing bound.
    Static(&'a RouteDescriptor),
    Dynamic(MatchResult<'a>),
}

impl<'a> RouteMatch<'a> {
    pub fn route(&self) -> &'a RouteDescriptor {
        match self {
            RouteMatch::Static(route) => route,
            RouteMatch::Dynamic(result) => result.route,
        }
    }

    pub fn params(&self) -> Option<&PathParams> {
        match self {
            RouteMatch::Static(_) => None,
            RouteMatch::Dynamic(result) => Some(&result.path_params),
        }
    }

    pub fn into_params(self) -> PathParams {
        match self {
            RouteMatch::Static(_) => PathParams::default(),
            RouteMatch::Dynamic(result) => result.path_params,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteMatcher {
    table: Arc<RouteTable>,
}

impl RouteMatcher {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn match_path(&self, request_path: &str) -> Option<RouteMatch<'_>> {
        let path = normalize_request_path(request_path);
        let request_segments: Vec<&str> = path[1..].split('/').collect();

        self.table.all_routes().find_map(|(_, route)| {
            let segments = route.pattern.segments();
            if segments.len() != request_segments.len() {
                return None;
            }

            let mut params = PathParams::default();
            for (pattern_segment, request_segment) in segments.iter().zip(&request_segments) {
                match pattern_segment {
                    Segment::Literal(literal) if literal == request_segment => {}
                    Segment::Literal(_) => return None,
                    Segment::Param(_) if request_segment.is_empty() => return None,
                    Segment::Param(name) => {
                        params.0.insert(name.clone(), (*request_segment).to_string());
                    }
                }
            }

            if params.is_empty() {
                Some(RouteMatch::Static(route))
            } else {
                Some(RouteMatch::Dynamic(MatchResult {
                    route,
                    path_params: params,
                }))
            }
        })
    }
}

pub fn normalize_request_path(path: &str) -> Cow<'_, str> {
    if path.starts_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("/{path}"))
    }
}
