use crate::duration::K8sDuration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares the routing profile for a Service: an ordered list of routes
/// matched against outbound requests, each carrying response
/// classification rules used to label metrics.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "linkerd.io",
    version = "v1alpha2",
    kind = "ServiceProfile",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProfileSpec {
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    pub retry_budget: Option<RetryBudgetSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub name: String,
    pub condition: RequestMatchSpec,
    #[serde(default)]
    pub response_classes: Vec<ResponseClassSpec>,
    #[serde(default)]
    pub is_retryable: bool,
    pub timeout: Option<K8sDuration>,
}

/// A request-match condition as an operator writes it: zero, one, or
/// several of these fields may be set at once. The translator in
/// `destination-core` decides how to reconcile that.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatchSpec {
    pub all: Option<Vec<RequestMatchSpec>>,
    pub any: Option<Vec<RequestMatchSpec>>,
    pub not: Option<Box<RequestMatchSpec>>,
    pub path_regex: Option<String>,
    pub method: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseClassSpec {
    pub condition: ResponseMatchSpec,
    #[serde(default)]
    pub is_failure: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMatchSpec {
    pub all: Option<Vec<ResponseMatchSpec>>,
    pub any: Option<Vec<ResponseMatchSpec>>,
    pub not: Option<Box<ResponseMatchSpec>>,
    pub status: Option<StatusRangeSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRangeSpec {
    pub min: Option<u16>,
    pub max: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryBudgetSpec {
    pub retry_ratio: f32,
    pub min_retries_per_second: u32,
    pub ttl: K8sDuration,
}

// === conversion into destination-core's translation input ===

impl From<&ServiceProfileSpec> for destination_core::profile::ServiceProfileDocument {
    fn from(spec: &ServiceProfileSpec) -> Self {
        destination_core::profile::ServiceProfileDocument {
            routes: spec.routes.iter().map(Into::into).collect(),
            retry_budget: spec.retry_budget.as_ref().map(Into::into),
        }
    }
}

impl From<&RouteSpec> for destination_core::profile::RawRouteSpec {
    fn from(r: &RouteSpec) -> Self {
        Self {
            name: r.name.clone(),
            condition: (&r.condition).into(),
            response_classes: r.response_classes.iter().map(Into::into).collect(),
            is_retryable: r.is_retryable,
            timeout: r.timeout.map(Into::into),
        }
    }
}

impl From<&RequestMatchSpec> for destination_core::profile::RawRequestMatch {
    fn from(m: &RequestMatchSpec) -> Self {
        Self {
            all: m
                .all
                .as_ref()
                .map(|cs| cs.iter().map(Into::into).collect()),
            any: m
                .any
                .as_ref()
                .map(|cs| cs.iter().map(Into::into).collect()),
            not: m.not.as_ref().map(|c| Box::new(c.as_ref().into())),
            path_regex: m.path_regex.clone(),
            method: m.method.clone(),
        }
    }
}

impl From<&ResponseClassSpec> for destination_core::profile::RawResponseClassSpec {
    fn from(c: &ResponseClassSpec) -> Self {
        Self {
            condition: (&c.condition).into(),
            is_failure: c.is_failure,
        }
    }
}

impl From<&ResponseMatchSpec> for destination_core::profile::RawResponseMatch {
    fn from(m: &ResponseMatchSpec) -> Self {
        Self {
            all: m
                .all
                .as_ref()
                .map(|cs| cs.iter().map(Into::into).collect()),
            any: m
                .any
                .as_ref()
                .map(|cs| cs.iter().map(Into::into).collect()),
            not: m.not.as_ref().map(|c| Box::new(c.as_ref().into())),
            status_min: m.status.as_ref().and_then(|s| s.min),
            status_max: m.status.as_ref().and_then(|s| s.max),
        }
    }
}

impl From<&RetryBudgetSpec> for destination_core::profile::RetryBudget {
    fn from(b: &RetryBudgetSpec) -> Self {
        Self {
            retry_ratio: b.retry_ratio,
            min_retries_per_second: b.min_retries_per_second,
            ttl: b.ttl.into(),
        }
    }
}
