#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]
#![warn(clippy::pedantic)]
#![warn(
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]
#![allow(
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::match_same_arms
)]

mod builder;
mod config;
mod errors;
mod maintenance;
mod metrics;
mod object;
mod pool;
mod registry;
mod slot;

pub use self::{
    builder::PoolBuilder,
    config::PoolConfig,
    errors::{ConfigError, PoolError, TimeoutType},
    maintenance::{LeakHook, LeakReport},
    metrics::{PoolMetrics, PoolStatus},
    object::Object,
    pool::Pool,
};

use async_trait::async_trait;

/// Manager responsible for opening, closing and validating the physical
/// connections behind a [`Pool`].
///
/// The pool never touches the connection itself; everything
/// backend-specific goes through this trait, so any resource that can be
/// opened, closed and probed for liveness can be pooled.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// Type of connections that this [`Manager`] opens and closes.
    type Connection: Send + 'static;

    /// Error that this [`Manager`] can return when opening a connection.
    type Error: Send + 'static;

    /// Opens a new physical connection.
    async fn open(&self) -> Result<Self::Connection, Self::Error>;

    /// Closes a physical connection. Failures are this method's to log;
    /// the pool has already removed the slot and will not retry.
    async fn close(&self, conn: Self::Connection);

    /// Checks that a connection is still usable. The pool bounds the call
    /// with [`PoolConfig::validation_timeout`] and treats an overrun as a
    /// failed validation.
    async fn validate(&self, conn: &mut Self::Connection) -> bool;
}
