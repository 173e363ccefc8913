// ABOUTME: Subscription records and the per-destination callback registry
// ABOUTME: Enforces one subscription per destination and registration-order dispatch

use crate::frame::Frame;
use std::collections::HashMap;

/// How received messages are acknowledged, per the `ack` SUBSCRIBE header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The server assumes delivery; no ACK is expected.
    #[default]
    Auto,
    /// ACKs are cumulative: one ACK covers the message and everything
    /// delivered before it on the subscription.
    Client,
    /// Every message is acknowledged individually.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    pub fn parse(value: &str) -> Option<AckMode> {
        match value {
            "auto" => Some(AckMode::Auto),
            "client" => Some(AckMode::Client),
            "client-individual" => Some(AckMode::ClientIndividual),
            _ => None,
        }
    }
}

/// A live subscription, keyed by destination in the registry.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// The id sent in the SUBSCRIBE frame; either caller-supplied or drawn
    /// from the session counter.
    pub id: String,
    pub ack: AckMode,
    /// Gzip-decode inbound message bodies on this destination.
    pub compressed: bool,
}

/// Options for [`crate::StompClient::subscribe`] beyond the wire headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubscribeOptions {
    /// Mark the subscription compressed: inbound bodies are gzip-decoded
    /// before dispatch.
    pub compressed: bool,
}

impl SubscribeOptions {
    pub fn compressed() -> SubscribeOptions {
        SubscribeOptions { compressed: true }
    }
}

/// A message callback. Runs inside the session task; keep it quick.
pub type MessageCallback = Box<dyn FnMut(&Frame) + Send>;

/// Identity token returned by callback registration, used for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(pub(crate) u64);

/// Per-destination callback lists. Dispatch order is registration order;
/// removal is by the id handed out at registration.
#[derive(Default)]
pub struct CallbackTable {
    callbacks: HashMap<String, Vec<(CallbackId, MessageCallback)>>,
    next_id: u64,
}

impl CallbackTable {
    pub fn register(&mut self, destination: &str, callback: MessageCallback) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks
            .entry(destination.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    /// Removes a callback by identity. Unknown ids are logged and ignored.
    pub fn remove(&mut self, destination: &str, id: CallbackId) {
        let Some(list) = self.callbacks.get_mut(destination) else {
            tracing::warn!(destination, "removing callback from unknown destination");
            return;
        };
        let before = list.len();
        list.retain(|(registered, _)| *registered != id);
        if list.len() == before {
            tracing::warn!(destination, ?id, "callback id not registered");
        }
        if list.is_empty() {
            self.callbacks.remove(destination);
        }
    }

    /// Runs every callback registered for `destination`, in registration
    /// order, against the same frame.
    pub fn dispatch(&mut self, destination: &str, frame: &Frame) {
        if let Some(list) = self.callbacks.get_mut(destination) {
            for (_, callback) in list.iter_mut() {
                callback(frame);
            }
        }
    }
}
