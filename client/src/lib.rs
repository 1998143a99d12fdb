//! # Hotelier Client Library
//!
//! Client side of the hotel review service.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! An async [`network::Client`] holding one TCP connection to the server.
//! Each method sends one request and waits for its response; server errors
//! come back as [`network::ClientError::Server`]. Ranking updates the server
//! pushes for subscribed cities are buffered and read with
//! [`network::Client::next_rank_update`].
//!
//! ### Multicast Module (`multicast`)
//! A [`multicast::MulticastListener`] that joins the announcement group and
//! yields the `"<City> top hotel changed: <Hotel>"` lines.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use shared::Scores;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:4316").await?;
//!     client.register("ann", "secret").await?;
//!     client.login("ann", "secret").await?;
//!
//!     for hotel in client.search_all_hotels("Pisa").await? {
//!         println!("{}. {}", hotel.local_rank, hotel.name);
//!     }
//!
//!     client
//!         .insert_review("Hotel Pisa 1", "Pisa", 4, Scores::new(5, 4, 4, 3))
//!         .await?;
//!     println!("Badge: {}", client.show_badge().await?);
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```

pub mod multicast;
pub mod network;
