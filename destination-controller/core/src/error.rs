/// Authority parsing/resolution errors, mapped to RPC status at the gRPC
/// surface.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("authority {0:?} is missing a port")]
    MissingPort(String),

    #[error("authority {0:?} has an invalid port")]
    InvalidPort(String),

    #[error("authority {0:?} is not a valid host:port pair")]
    Malformed(String),
}

/// Errors raised while resolving an authority through the resolver chain.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no resolver claims authority {0:?}")]
    Unresolvable(String),

    #[error("resolver rejected authority {0:?}: {1}")]
    Rejected(String, String),
}
