//! STOMP client module.
//!
//! The client is a pair of cooperating tasks per connection:
//!
//! * the **session task** owns the write half of the socket, the
//!   subscription registry and the callback table, and processes requests
//!   one at a time, so no session state is ever shared or locked;
//! * the **receiver task** owns the read half and delivers one frame per
//!   pull, so a slow consumer backs pressure up into the TCP window.
//!
//! [`StompClient`] is the handle over both. See [`StompClient`] for a usage
//! example.

pub mod config;
pub mod error;
pub mod session;
pub mod subscription;

pub use config::ConnectionConfig;
pub use error::{StompError, StompResult};
pub use session::{StompClient, StompEvent};
pub use subscription::{AckMode, CallbackId, MessageCallback, SubscribeOptions, Subscription};
