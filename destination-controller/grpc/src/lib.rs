#![deny(warnings, rust_2018_idioms)]
#![allow(clippy::result_large_err)]
#![forbid(unsafe_code)]

mod destination;

pub mod metrics;

pub use self::destination::{parse_authority, DestinationServer};
