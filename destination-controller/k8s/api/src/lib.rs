#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod profile;

pub use k8s_openapi::{
    api::core::v1::{
        Container, ContainerPort, EndpointAddress, EndpointPort, EndpointSubset, Endpoints,
        ObjectReference, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
    },
    apimachinery::pkg::{apis::meta::v1::Condition, util::intstr::IntOrString},
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    error::ErrorResponse,
    runtime::watcher::Event as WatchEvent,
    Client, Error,
};
