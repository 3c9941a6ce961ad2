//! # Kvik — pub/sub messaging for constrained wireless nodes
//!
//! Kvik is a lightweight publish/subscribe fabric for IoT deployments: leaf
//! nodes ("clients") talk over a pluggable broadcast-capable local layer
//! (typically an RF link) to a gateway, which bridges onto a conventional
//! broker through a pluggable remote layer. This crate is the **client
//! core** plus the reusable primitives it is built from.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use kvik::{Client, ClientConfig};
//!
//! // Bring your own local layer (radio driver, test double, ...).
//! let radio: Arc<dyn kvik::LocalLayer> = my_radio();
//!
//! // Discovers a gateway, syncs time, starts background renewal.
//! let client = Client::connect(ClientConfig::default(), radio).await?;
//!
//! client.subscribe("garden/+/humidity", Arc::new(|data| {
//!     println!("{} = {}", data.topic, data.payload);
//! })).await?;
//! client.publish("garden/pump/state", "on").await?;
//!
//! // Before deep sleep: snapshot, and resume without a full discovery.
//! let retained = client.retain();
//! client.shutdown().await;
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`client`] | Gateway discovery, time sync, reliable request/response, subscription renewal, retained snapshots |
//! | [`layers`] | `LocalLayer` / `RemoteLayer` seams the node plugs into |
//! | [`local_broker`] | In-process broker, the simplest remote layer |
//! | [`node`] | Shared node base: message IDs, replay validation |
//! | [`wildcard_trie`] | Topic-keyed map with `+`/`#` wildcard lookup |
//! | [`msg_id_cache`] | Expiring `(peer, id)` cache for replay protection |
//! | [`timer`] | Anchored periodic timer for background work |
//! | [`local_msg`], [`local_peer`], [`local_addr`], [`pub_sub`] | Data model |
//! | [`config`], [`error`], [`time`] | Configuration, error codes, steady clock |
//!
//! ## Replay protection
//!
//! Every message carries a sender-chosen ID and a coarse timestamp counted
//! in the configured `time_unit`. Receivers reject IDs already seen from
//! the same peer within the last `max_age` units and timestamps outside the
//! accepted drift window; the message ID cache, the on-wire timestamp and
//! the eviction timer all share the same unit, so the two checks hand over
//! to each other without a gap. `time_unit` and `max_age` must therefore be
//! identical on all communicating nodes.

pub mod client;
pub mod config;
pub mod error;
pub mod layers;
pub mod local_addr;
pub mod local_broker;
pub mod local_msg;
pub mod local_peer;
pub mod msg_id_cache;
pub mod node;
pub mod pub_sub;
pub mod time;
pub mod timer;
pub mod wildcard_trie;

pub use client::{Client, ClientRetainedData};
pub use config::{ClientConfig, NodeConfig};
pub use error::{Error, Result};
pub use layers::{LocalLayer, LocalReceiver, ReconnectCb, RemoteLayer, RemoteRecvCb};
pub use local_addr::LocalAddr;
pub use local_broker::LocalBroker;
pub use local_msg::{LocalMsg, LocalMsgFailReason, LocalMsgType, MSG_RSSI_UNKNOWN, NodeType};
pub use local_peer::{LocalPeer, RetainedLocalPeer};
pub use msg_id_cache::MsgIdCache;
pub use node::NodeCore;
pub use pub_sub::{PubData, SubCb, SubData, SubReq};
pub use timer::Timer;
pub use wildcard_trie::WildcardTrie;

/// Crate version, logged once at client construction.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
