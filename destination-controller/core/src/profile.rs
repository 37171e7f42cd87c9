//! The routing profile domain model and the translator that turns a
//! declarative profile document into the wire-ready [`Profile`].
//!
//! Grounded on the proxy's client-side `RequestMatch`/`ResponseMatch` trees
//! (an `All`/`Any`/`Not`/leaf predicate shape), reused here as the *target*
//! of translation; the *source* is the looser, possibly-malformed document
//! shape a cluster operator writes by hand, modeled below as the `Raw*`
//! types.

use std::collections::BTreeMap;
use std::time::Duration;

/// A translated, wire-ready routing profile: an ordered list of routes plus
/// an optional retry budget.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Profile {
    pub routes: Vec<Route>,
    pub retry_budget: Option<RetryBudget>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub condition: RequestMatch,
    pub labels: BTreeMap<String, String>,
    pub response_classes: Vec<ResponseClass>,
    pub is_retryable: bool,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseClass {
    pub condition: ResponseMatch,
    pub is_failure: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryBudget {
    pub retry_ratio: f32,
    pub min_retries_per_second: u32,
    pub ttl: Duration,
}

/// A recursive request-match predicate tree.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestMatch {
    All(Vec<RequestMatch>),
    Any(Vec<RequestMatch>),
    Not(Box<RequestMatch>),
    Path(String),
    Method(String),
}

/// A recursive response-match predicate tree.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseMatch {
    All(Vec<ResponseMatch>),
    Any(Vec<ResponseMatch>),
    Not(Box<ResponseMatch>),
    Status { min: u16, max: u16 },
}

/// The declarative, possibly-malformed source document: a list of named
/// routes, each carrying a raw request condition and response classes.
///
/// This is the shape a cluster operator hand-writes (or the `ServiceProfile`
/// custom resource carries); unlike [`RequestMatch`]/[`ResponseMatch`], a
/// `Raw*` condition may have zero, one, or several primitive fields set at
/// once and is not yet known to be well-formed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceProfileDocument {
    pub routes: Vec<RawRouteSpec>,
    pub retry_budget: Option<RetryBudget>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawRouteSpec {
    pub name: String,
    pub condition: RawRequestMatch,
    pub response_classes: Vec<RawResponseClassSpec>,
    pub is_retryable: bool,
    pub timeout: Option<Duration>,
}

/// A raw request condition: any combination of a combinator and/or
/// primitive fields may be set; translation decides how to reconcile them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawRequestMatch {
    pub all: Option<Vec<RawRequestMatch>>,
    pub any: Option<Vec<RawRequestMatch>>,
    pub not: Option<Box<RawRequestMatch>>,
    pub path_regex: Option<String>,
    pub method: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawResponseClassSpec {
    pub condition: RawResponseMatch,
    pub is_failure: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawResponseMatch {
    pub all: Option<Vec<RawResponseMatch>>,
    pub any: Option<Vec<RawResponseMatch>>,
    pub not: Option<Box<RawResponseMatch>>,
    pub status_min: Option<u16>,
    pub status_max: Option<u16>,
}

/// Translates a declarative document into the wire-ready [`Profile`].
///
/// Malformed routes and response classes are dropped, never propagated as
/// errors: a route with no usable condition is omitted entirely; a
/// response class with an invalid status range is omitted from its route,
/// which is otherwise kept. Translating the same document twice yields
/// byte-identical output (determinism, P5).
pub fn translate(doc: &ServiceProfileDocument) -> Profile {
    let routes = doc
        .routes
        .iter()
        .filter_map(translate_route)
        .collect();
    Profile {
        routes,
        retry_budget: doc.retry_budget.clone(),
    }
}

fn translate_route(raw: &RawRouteSpec) -> Option<Route> {
    let condition = translate_request_match(&raw.condition)?;

    let mut labels = BTreeMap::new();
    labels.insert("route".to_string(), raw.name.clone());

    let response_classes = raw
        .response_classes
        .iter()
        .filter_map(translate_response_class)
        .collect();

    Some(Route {
        condition,
        labels,
        response_classes,
        is_retryable: raw.is_retryable,
        timeout: raw.timeout,
    })
}

/// Reconciles a raw request condition into a well-formed tree.
///
/// - If more than one field is set (combinator(s) and/or a primitive), the
///   parts are wrapped in an `All`.
/// - If exactly one field is set, it translates directly.
/// - If nothing is set, the condition is malformed and translation fails
///   (the caller drops the whole route).
/// - Combinator children are translated recursively; a child that fails to
///   translate is dropped, not propagated as a hard error — but a
///   combinator left with zero surviving children is itself malformed.
fn translate_request_match(raw: &RawRequestMatch) -> Option<RequestMatch> {
    let mut parts = Vec::new();

    if let Some(children) = &raw.all {
        let translated: Vec<_> = children.iter().filter_map(translate_request_match).collect();
        if !translated.is_empty() {
            parts.push(RequestMatch::All(translated));
        }
    }
    if let Some(children) = &raw.any {
        let translated: Vec<_> = children.iter().filter_map(translate_request_match).collect();
        if !translated.is_empty() {
            parts.push(RequestMatch::Any(translated));
        }
    }
    if let Some(child) = &raw.not {
        if let Some(translated) = translate_request_match(child) {
            parts.push(RequestMatch::Not(Box::new(translated)));
        }
    }
    if let Some(path) = &raw.path_regex {
        // An unparseable regex can never match anything; drop just this
        // primitive rather than letting it poison the whole condition.
        if regex::Regex::new(path).is_ok() {
            parts.push(RequestMatch::Path(path.clone()));
        } else {
            tracing::debug!(regex = %path, "dropping route condition with invalid path regex");
        }
    }
    if let Some(method) = &raw.method {
        parts.push(RequestMatch::Method(method.clone()));
    }

    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(RequestMatch::All(parts)),
    }
}

fn translate_response_class(raw: &RawResponseClassSpec) -> Option<ResponseClass> {
    let condition = translate_response_match(&raw.condition)?;
    Some(ResponseClass {
        condition,
        is_failure: raw.is_failure,
    })
}

fn translate_response_match(raw: &RawResponseMatch) -> Option<ResponseMatch> {
    let mut parts = Vec::new();

    if let Some(children) = &raw.all {
        let translated: Vec<_> = children.iter().filter_map(translate_response_match).collect();
        if !translated.is_empty() {
            parts.push(ResponseMatch::All(translated));
        }
    }
    if let Some(children) = &raw.any {
        let translated: Vec<_> = children.iter().filter_map(translate_response_match).collect();
        if !translated.is_empty() {
            parts.push(ResponseMatch::Any(translated));
        }
    }
    if let Some(child) = &raw.not {
        if let Some(translated) = translate_response_match(child) {
            parts.push(ResponseMatch::Not(Box::new(translated)));
        }
    }
    if raw.status_min.is_some() || raw.status_max.is_some() {
        let min = raw.status_min.unwrap_or(100);
        // A bare `min` with no `max` covers the rest of the valid range.
        let max = raw.status_max.unwrap_or(599);
        if min <= max && (100..=599).contains(&min) && (100..=599).contains(&max) {
            parts.push(ResponseMatch::Status { min, max });
        }
        // An invalid range (min > max, or out of bounds) drops just this
        // primitive; if it was the only field set, the class is dropped
        // below via the empty-parts case.
    }

    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(ResponseMatch::All(parts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_condition_drops_route() {
        // Scenario 5: a route whose RequestMatch = {} is absent from output.
        let doc = ServiceProfileDocument {
            routes: vec![
                RawRouteSpec {
                    name: "empty".to_string(),
                    condition: RawRequestMatch::default(),
                    ..Default::default()
                },
                RawRouteSpec {
                    name: "ok".to_string(),
                    condition: RawRequestMatch {
                        path_regex: Some("/foo".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ],
            retry_budget: None,
        };

        let profile = translate(&doc);
        assert_eq!(profile.routes.len(), 1);
        assert_eq!(profile.routes[0].labels.get("route").unwrap(), "ok");
    }

    #[test]
    fn multi_field_condition_wraps_in_all() {
        let doc = ServiceProfileDocument {
            routes: vec![RawRouteSpec {
                name: "multi".to_string(),
                condition: RawRequestMatch {
                    path_regex: Some("/foo".to_string()),
                    method: Some("GET".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            retry_budget: None,
        };

        let profile = translate(&doc);
        assert_eq!(profile.routes.len(), 1);
        match &profile.routes[0].condition {
            RequestMatch::All(children) => assert_eq!(children.len(), 2),
            other => panic!("expected All, got {other:?}"),
        }
    }

    #[test]
    fn invalid_status_range_drops_class_keeps_route() {
        // Scenario 6: {min: 201, max: 200} drops the class, keeps the route.
        let doc = ServiceProfileDocument {
            routes: vec![RawRouteSpec {
                name: "r".to_string(),
                condition: RawRequestMatch {
                    path_regex: Some("/foo".to_string()),
                    ..Default::default()
                },
                response_classes: vec![RawResponseClassSpec {
                    condition: RawResponseMatch {
                        status_min: Some(201),
                        status_max: Some(200),
                        ..Default::default()
                    },
                    is_failure: true,
                }],
                ..Default::default()
            }],
            retry_budget: None,
        };

        let profile = translate(&doc);
        assert_eq!(profile.routes.len(), 1);
        assert!(profile.routes[0].response_classes.is_empty());
    }

    #[test]
    fn bare_min_status_defaults_max_to_599() {
        let doc = ServiceProfileDocument {
            routes: vec![RawRouteSpec {
                name: "r".to_string(),
                condition: RawRequestMatch {
                    path_regex: Some("/foo".to_string()),
                    ..Default::default()
                },
                response_classes: vec![RawResponseClassSpec {
                    condition: RawResponseMatch {
                        status_min: Some(500),
                        ..Default::default()
                    },
                    is_failure: true,
                }],
                ..Default::default()
            }],
            retry_budget: None,
        };

        let profile = translate(&doc);
        match &profile.routes[0].response_classes[0].condition {
            ResponseMatch::Status { min, max } => {
                assert_eq!(*min, 500);
                assert_eq!(*max, 599);
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn translation_is_deterministic() {
        let doc = ServiceProfileDocument {
            routes: vec![RawRouteSpec {
                name: "r".to_string(),
                condition: RawRequestMatch {
                    path_regex: Some("/foo".to_string()),
                    method: Some("GET".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            retry_budget: None,
        };

        assert_eq!(translate(&doc), translate(&doc));
    }

    #[test]
    fn invalid_path_regex_drops_route() {
        let doc = ServiceProfileDocument {
            routes: vec![RawRouteSpec {
                name: "bad".to_string(),
                condition: RawRequestMatch {
                    path_regex: Some("(unclosed".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            retry_budget: None,
        };

        assert!(translate(&doc).routes.is_empty());
    }

    #[test]
    fn unknown_nested_malformed_child_is_dropped_not_fatal() {
        let doc = ServiceProfileDocument {
            routes: vec![RawRouteSpec {
                name: "r".to_string(),
                condition: RawRequestMatch {
                    any: Some(vec![
                        RawRequestMatch::default(),
                        RawRequestMatch {
                            method: Some("GET".to_string()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                },
                ..Default::default()
            }],
            retry_budget: None,
        };

        let profile = translate(&doc);
        assert_eq!(profile.routes.len(), 1);
        match &profile.routes[0].condition {
            RequestMatch::Any(children) => assert_eq!(children.len(), 1),
            other => panic!("expected Any, got {other:?}"),
        }
    }
}
