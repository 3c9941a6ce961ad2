//! Publication/subscription data records and callbacks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Data received for a subscription: topic plus payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubData {
    pub topic: String,
    pub payload: String,
}

impl std::fmt::Display for SubData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' => '{}'", self.topic, self.payload)
    }
}

/// Data to publish: topic plus payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubData {
    pub topic: String,
    pub payload: String,
}

impl PubData {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Conversion for the case where a publication is immediately delivered
    /// back as subscription data (see [`crate::LocalBroker`]).
    pub fn to_sub_data(&self) -> SubData {
        SubData {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl std::fmt::Display for PubData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' => '{}'", self.topic, self.payload)
    }
}

/// Subscription callback, invoked for each delivered [`SubData`] whose topic
/// matches the subscription pattern. Called sequentially from the local
/// layer's receive context; keep it short.
pub type SubCb = Arc<dyn Fn(&SubData) + Send + Sync>;

/// Subscription request: a topic pattern plus the callback to fire.
#[derive(Clone)]
pub struct SubReq {
    pub topic: String,
    pub cb: SubCb,
}

impl SubReq {
    pub fn new(topic: impl Into<String>, cb: SubCb) -> Self {
        Self {
            topic: topic.into(),
            cb,
        }
    }
}

impl std::fmt::Debug for SubReq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubReq").field("topic", &self.topic).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pub_to_sub_conversion() {
        let pub_data = PubData::new("a/b", "payload");
        let sub_data = pub_data.to_sub_data();
        assert_eq!(sub_data.topic, "a/b");
        assert_eq!(sub_data.payload, "payload");
    }

    #[test]
    fn display_form() {
        assert_eq!(PubData::new("t", "p").to_string(), "'t' => 'p'");
    }
}
