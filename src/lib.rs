//! Async STOMP 1.0/1.1/1.2 client.
//!
//! Connects to a STOMP broker over TCP or TLS, negotiates the protocol
//! version, subscribes to destinations and streams MESSAGE frames to
//! registered callbacks (or to the owner's event channel), with support for
//! acknowledgements, heartbeat recognition and per-subscription gzip
//! decompression.
//!
//! # Example
//!
//! ```rust,no_run
//! use stomp::{ConnectionConfig, StompClient, SubscribeOptions};
//!
//! #[tokio::main]
//! async fn main() -> stomp::StompResult<()> {
//!     let mut client = StompClient::connect(
//!         ConnectionConfig::new("broker.example.com")
//!             .with_credentials("guest", "guest"),
//!     )
//!     .await?;
//!
//!     client
//!         .register_callback("/topic/prices", |frame| {
//!             println!("price update: {} bytes", frame.body.len());
//!         })
//!         .await?;
//!     client
//!         .subscribe("/topic/prices", Vec::new(), SubscribeOptions::default())
//!         .await?;
//!
//!     // ... later
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod frame;
pub mod protocol;
pub mod receiver;
pub mod transport;


// Re-export the frame and protocol types for direct access
pub use codec::{FrameParser, ParseError, ParseState};
pub use frame::{Command, Frame, FrameBuilder};
pub use protocol::{HeaderValue, Version, ack_header, format_header, normalize_version, valid_command};

// Re-export the main client API for easy access
pub use client::{
    AckMode, CallbackId, ConnectionConfig, StompClient, StompError, StompEvent, StompResult,
    SubscribeOptions,
};
