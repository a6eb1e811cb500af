//! # Game Server Fleet Manager
//!
//! This library manages a fleet of independently running game server
//! processes on one host. It creates their on-disk instances, starts and
//! stops the OS processes, probes liveness, gates commands by role and keeps
//! a snapshot history of every instance directory for recovery.
//!
//! ## Core Responsibilities
//!
//! ### Instance Lifecycle
//! An instance moves through `Absent → Created → {Stopped ⇄ Running} →
//! Deleted`. Creation builds the directory (properties, EULA, jar, role
//! lists, snapshot history); deletion is terminal and removes it again.
//! Regeneration resets the world while keeping configuration, and upgrading
//! moves an instance to the newest cached release of its flavor.
//!
//! ### Liveness
//! Running state is never stored. It is answered by connecting to the
//! instance's control endpoint with a short timeout, so a server that
//! crashed or was killed by hand is noticed on the next call.
//!
//! ### Permissions
//! Callers arrive with an already verified identity. Each call resolves the
//! caller's role on the target instance (player, op or owner) and checks it
//! against a fixed action table before anything happens.
//!
//! ### Snapshots
//! Mutating operations are bracketed by commits in a per-instance history.
//! Committing an unchanged directory succeeds, so brackets never fail just
//! because nothing changed.
//!
//! ## Module Organization
//!
//! ### Records (`model`, `properties`, `storage`)
//! - Persisted JSON records and the `server.properties` codec
//! - The storage layout and every filesystem operation on it
//!
//! ### Collaborators (`dispatch`, `snapshot`, `launcher`, `releases`, `identity`)
//! Each concern sits behind a trait with one production implementation:
//! RCON over TCP, `git`, detached Java processes, the local jar cache and
//! the public profile API. [`context::FleetContext`] bundles them.
//!
//! ### Fleet (`instance`, `registry`, `fleet`)
//! - [`instance::Instance`] runs the lifecycle of one server directory
//! - [`registry::Registry`] indexes instances, allocates ports and hands out
//!   per-instance locks
//! - [`fleet::Fleet`] is the caller-facing facade with permission checks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use manager::config::ManagerConfig;
//! use manager::context::FleetContext;
//! use manager::fleet::Fleet;
//! use manager::model::CreateRequest;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (_shutdown, shutdown_rx) = watch::channel(false);
//!     let ctx = FleetContext::new(ManagerConfig::new("/srv/mcmanager"), shutdown_rx)?;
//!     let fleet = Fleet::new(Arc::new(ctx));
//!     fleet.open().await?;
//!
//!     let request = CreateRequest::new("Survival", "vanilla", "1.20.1");
//!     let instance = fleet.create("alice", &request).await?;
//!     fleet.start("alice", instance.id()).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Every operation is an independent task. The registry map sits behind an
//! async read/write lock and is replaced wholesale on reload. Destructive
//! operations on the same instance are serialised by a per-instance mutex;
//! operations on different instances run freely in parallel.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod identity;
pub mod instance;
pub mod launcher;
pub mod model;
pub mod permissions;
pub mod properties;
pub mod registry;
pub mod releases;
pub mod snapshot;
pub mod storage;

#[cfg(test)]
mod test_support;
