//! In-process broker remote layer.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::layers::{ReconnectCb, RemoteLayer, RemoteRecvCb};
use crate::pub_sub::PubData;
use crate::wildcard_trie::WildcardTrie;

/// Remote layer acting as a tiny local MQTT-style broker.
///
/// Keeps a set of subscribed topic filters; a publication whose topic
/// matches any of them is handed straight back through the receive callback,
/// synchronously from the publisher's context. Overlapping filters cause a
/// single delivery: the broker is a set of filters, not a subscriber fanout.
///
/// This is the simplest possible remote layer, useful for single-node
/// deployments and tests.
pub struct LocalBroker {
    inner: Mutex<BrokerInner>,
}

struct BrokerInner {
    subs: WildcardTrie<()>,
    recv_cb: Option<RemoteRecvCb>,
}

impl LocalBroker {
    /// Broker with the conventional `/`, `+`, `#` topic tokens.
    pub fn new() -> Self {
        Self::with_separators("/", "+", "#").expect("default topic tokens are valid")
    }

    /// Broker with custom topic tokens; fails like
    /// [`WildcardTrie::new`] on empty or colliding tokens.
    pub fn with_separators(
        level_separator: &str,
        single_level_wildcard: &str,
        multi_level_wildcard: &str,
    ) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(BrokerInner {
                subs: WildcardTrie::new(
                    level_separator,
                    single_level_wildcard,
                    multi_level_wildcard,
                )?,
                recv_cb: None,
            }),
        })
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteLayer for LocalBroker {
    async fn publish(&self, data: &PubData) -> Result<()> {
        debug!(topic = %data.topic, bytes = data.payload.len(), "publishing");

        let cb = {
            let inner = self.inner.lock().expect("broker lock poisoned");
            if inner.subs.find(&data.topic).is_empty() {
                None
            } else {
                inner.recv_cb.clone()
            }
        };

        if let Some(cb) = cb {
            debug!(topic = %data.topic, "subscription exists, delivering back");
            cb(&data.to_sub_data())?;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        debug!(topic, "subscribe");
        inner.subs.insert(topic, ());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        if !inner.subs.remove(topic) {
            debug!(topic, "unsubscribe: subscription doesn't exist");
            return Err(Error::NotFound);
        }
        debug!(topic, "unsubscribe: success");
        Ok(())
    }

    fn set_recv_cb(&self, cb: Option<RemoteRecvCb>) {
        self.inner.lock().expect("broker lock poisoned").recv_cb = cb;
    }

    fn set_reconnect_cb(&self, _cb: Option<ReconnectCb>) {
        // Nothing to reconnect to; the broker lives in-process.
    }
}
