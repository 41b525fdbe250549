//! Endpoint discovery.
//!
//! The hub advertises its two channel addresses through environment
//! variables that a supervisor injects into spawned workers.  A proxy
//! constructed with no inherited variables fails with a typed
//! not-configured error rather than guessing.
//!
//! The variables are written once at hub start and never mutated after;
//! lookups are injectable so tests never touch the process environment.

use crate::error::ClientError;
use sb_protocol::{EVENTS_ADDR_ENV, REPLY_ADDR_ENV};
use std::net::SocketAddr;

/// The two resolved channel addresses of one hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub reply_addr: SocketAddr,
    pub events_addr: SocketAddr,
}

impl Endpoints {
    pub fn new(reply_addr: SocketAddr, events_addr: SocketAddr) -> Self {
        Endpoints {
            reply_addr,
            events_addr,
        }
    }

    /// Resolve from the inherited process environment.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve through an arbitrary lookup (tests, config layers).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        Ok(Endpoints {
            reply_addr: resolve(&lookup, REPLY_ADDR_ENV)?,
            events_addr: resolve(&lookup, EVENTS_ADDR_ENV)?,
        })
    }
}

fn resolve(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<SocketAddr, ClientError> {
    let raw = lookup(name).ok_or_else(|| ClientError::NotConfigured(format!("{name} is not set")))?;
    raw.parse().map_err(|_| {
        ClientError::NotConfigured(format!("{name} is not a socket address: '{raw}'"))
    })
}
