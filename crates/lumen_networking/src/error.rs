//! # Error Types
//!
//! Failures in this crate split into two groups: setup operations
//! (binding a socket, resolving a host, parsing a config file) return a
//! [`NetError`], while steady-state protocol traffic reports failure
//! through `bool`/`Option` returns and log output. Nothing in the
//! session path panics on malformed input.

use std::io;

/// Errors produced by session and discovery setup operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Binding the UDP socket failed (port already in use, permissions).
    #[error("failed to bind UDP socket on port {port}")]
    Bind {
        /// The local port the bind was attempted on.
        port: u16,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// A host name did not resolve to any IPv4 address.
    #[error("could not resolve host '{host}' to an IPv4 address")]
    Resolve {
        /// The host name that failed to resolve.
        host: String,
    },

    /// The discovery reception thread could not be spawned.
    #[error("failed to spawn discovery reception thread")]
    Spawn(#[source] io::Error),

    /// A network configuration file failed to parse.
    #[error("invalid network configuration")]
    Config(#[from] toml::de::Error),
}

/// Convenience alias for results with a [`NetError`].
pub type NetResult<T> = Result<T, NetError>;
