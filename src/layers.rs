//! Local and remote layer interfaces.
//!
//! Layers are the two pluggable edges of a Kvik node: the local layer is
//! the nearby-peer transport (typically a broadcast-capable RF link) a
//! client talks to its gateway through, and the remote layer bridges a
//! gateway onto a conventional broker. Traits are defined separately from
//! implementations so node logic depends only on the seam, mirroring the
//! protocol-trait layout used across the codebase.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::local_msg::LocalMsg;
use crate::pub_sub::{PubData, SubData};

/// Receiver half of the local layer: the node side that messages are
/// delivered into. The layer calls [`LocalReceiver::recv_local`] from its
/// own task for every inbound message and may do so concurrently.
#[async_trait]
pub trait LocalReceiver: Send + Sync {
    /// Hands a received message to the node.
    ///
    /// The returned error is the discard reason (duplicate ID, invalid
    /// timestamp, unknown sender, ...); layers may log it and carry on.
    async fn recv_local(&self, msg: LocalMsg) -> Result<()>;
}

/// Local layer: delivers [`LocalMsg`] records to and from nearby peers.
#[async_trait]
pub trait LocalLayer: Send + Sync + 'static {
    /// Sends the message to `msg.addr`, or broadcasts it when the address
    /// is empty. Should be used by the owning node only.
    async fn send(&self, msg: &LocalMsg) -> Result<()>;

    /// Channels this layer can hop between, probed during gateway
    /// discovery. An empty list means channel hopping is disabled and no
    /// [`LocalLayer::set_channel`] call will be made (unless retained client
    /// data carries a stale channel).
    fn channels(&self) -> Vec<u16>;

    /// Switches to the given channel; channel 0 is the default one.
    ///
    /// Layers without channels should return [`crate::Error::NotSupported`].
    async fn set_channel(&self, channel: u16) -> Result<()>;

    /// Attaches (or, with `None`, detaches) the receiver that inbound
    /// messages are delivered to.
    fn set_receiver(&self, receiver: Option<Arc<dyn LocalReceiver>>);
}

/// Callback invoked by a remote layer for received subscription data.
pub type RemoteRecvCb = Arc<dyn Fn(&SubData) -> Result<()> + Send + Sync>;

/// Callback invoked by a remote layer after it reconnects to its broker.
pub type ReconnectCb = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Remote layer: bridges a gateway onto an external broker (MQTT or an
/// in-process one, see [`crate::LocalBroker`]).
#[async_trait]
pub trait RemoteLayer: Send + Sync + 'static {
    /// Publishes a message coming from the node.
    async fn publish(&self, data: &PubData) -> Result<()>;

    /// Subscribes to the given topic filter.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Unsubscribes from the given topic filter.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Sets the receive callback for subscription data.
    fn set_recv_cb(&self, cb: Option<RemoteRecvCb>);

    /// Sets the callback fired after broker reconnection (used by nodes to
    /// re-establish subscriptions).
    fn set_reconnect_cb(&self, cb: Option<ReconnectCb>);
}
