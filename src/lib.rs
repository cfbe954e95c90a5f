//! # netdde-client
//!
//! Async Rust client for the NetDDE TCP bridging protocol: legacy DDE
//! semantics (conversations, topics, items, advise subscriptions) exposed
//! over a network socket.
//!
//! ## Architecture
//!
//! - **Wire codec** ([`protocol`]): frame parsing with partial-buffer
//!   reassembly and byte-exact serialization
//! - **Endpoint** ([`endpoint`]): sequence-id allocation, pending-request
//!   correlation, timeouts, async notice routing
//! - **Client** ([`NetDdeClient`]): connection state machine, conversation
//!   tables, lock-guarded conversation creation, graceful shutdown
//!
//! ## Example
//!
//! ```ignore
//! use netdde_client::{format, ClientOptions, NetDdeClient};
//!
//! #[tokio::main]
//! async fn main() -> netdde_client::Result<()> {
//!     let client = NetDdeClient::new(
//!         "EXCEL",
//!         ClientOptions {
//!             host: "192.168.10.20".into(),
//!             ..ClientOptions::default()
//!         },
//!     )?;
//!
//!     client.connect().await?;
//!
//!     let value = client
//!         .request("[Book1.xlsx]Sheet1", "r1c1", format::CF_TEXT)
//!         .await?;
//!     println!("r1c1 = {value:?}");
//!
//!     client.disconnect().await
//! }
//! ```

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod transport;

mod client;

pub use client::{AdviseEvent, ClientEvent, ClientOptions, NetDdeClient};
pub use codec::{format, DdeData};
pub use error::{NetDdeError, Result};
