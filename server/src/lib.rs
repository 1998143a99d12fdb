//! # Hotelier Server Library
//!
//! This library implements the hotel review service: clients register, log
//! in, browse hotels by city, submit reviews, and are told when the ranking
//! of a city they care about changes.
//!
//! ## Core Responsibilities
//!
//! ### Request Handling
//! Every client keeps one TCP connection open and speaks a framed binary
//! protocol (see `shared::protocol`). Each request gets exactly one
//! response, either the matching success message or an error message.
//!
//! ### Reviews and Reputation
//! A review updates its hotel's running averages and review count and the
//! author's review count and badge, and is persisted together with them.
//!
//! ### Ranking and Notifications
//! A background engine periodically scores every hotel from its review
//! volume, average rate and review recency, orders hotels within each city,
//! and publishes changes through two channels:
//! - a UDP multicast line whenever a city's top hotel changes;
//! - a push frame with the full ordering, sent to connections subscribed to
//!   that city.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded I/O Loop
//! All socket I/O happens on one thread (`network`). Each connection is a
//! small state machine (`session`) that accumulates partial reads into whole
//! frames and drains its queued responses with partial writes.
//!
//! ### Worker Pool
//! Decoded requests run on the tokio blocking pool (`dispatcher`), never on
//! the I/O thread. A connection hands out at most one request at a time, so
//! its responses come back in request order.
//!
//! ### Shared State
//! The registries (`registry`) hold hotels, users and reviews, each behind
//! its own lock, and write them to JSON files after every change. They are
//! created once by the composition root (`app`) and shared with the
//! dispatcher and the ranking engine.
//!
//! ## Module Organization
//!
//! - `app`: builds and starts every component
//! - `config`: JSON configuration file with defaults
//! - `dispatcher`: request routing and per-connection authentication
//! - `error`: error types of every layer
//! - `login`: the set of logged-in accounts
//! - `network`: the connection multiplexer
//! - `notify`: multicast announcements and subscriber fan-out
//! - `ranking`: the periodic ranking engine
//! - `registry`: hotel, user and review collections
//! - `session`: per-connection framing state and outbound queue
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::app::App;
//! use server::config::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let running = App::new(config)?.start().await?;
//!     println!("Listening on {}", running.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     running.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod login;
pub mod network;
pub mod notify;
pub mod ranking;
pub mod registry;
pub mod session;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
