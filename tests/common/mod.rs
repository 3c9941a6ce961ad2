//! Shared test double: a scripted local layer.
//!
//! The mock logs everything the client does (sent messages, channel
//! switches, receive return codes) and injects scripted responses from a
//! spawned task, like a real layer delivering from its own context.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use kvik::config::{
    ClientConfig, ClientReporting, GatewayDiscovery, LocalDelivery, MsgIdCacheConfig, NodeConfig,
    SubDb, TimeSync,
};
use kvik::error::Result;
use kvik::layers::{LocalLayer, LocalReceiver};
use kvik::local_addr::LocalAddr;
use kvik::local_msg::{LocalMsg, LocalMsgFailReason, LocalMsgType, NodeType};
use kvik::local_peer::LocalPeer;
use kvik::pub_sub::{PubData, SubData};
use kvik::time::unit_timestamp;

/// Client configuration with timings compressed for tests.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        node: NodeConfig {
            local_delivery: LocalDelivery {
                resp_timeout: Duration::from_millis(20),
            },
            msg_id_cache: MsgIdCacheConfig {
                time_unit: Duration::from_millis(10),
                max_age: 2,
            },
            ..Default::default()
        },
        gw_dscv: GatewayDiscovery {
            dscv_min_delay: Duration::from_millis(5),
            dscv_max_delay: Duration::from_secs(1),
            initial_dscv_fail_thres: 3,
            trig_msgs_fail_cnt: 5,
            trig_time_sync_no_resp_cnt: 2,
        },
        reporting: ClientReporting {
            rssi_on_gw_dscv: false,
        },
        sub_db: SubDb {
            sub_lifetime: Duration::from_secs(1),
        },
        time_sync: TimeSync {
            sync_system_time: false,
            reprobe_gateway_interval: Duration::from_secs(1),
        },
    }
}

pub struct MockState {
    /// Return code of `send`.
    pub send_result: Result<()>,
    /// Return code of `set_channel`.
    pub set_channel_result: Result<()>,
    /// Channels reported by `channels()`.
    pub channels: Vec<u16>,
    /// Scripted responses, one popped per `send`.
    pub responses: VecDeque<LocalMsg>,
    /// When non-empty the queue is ignored and every send is answered
    /// according to the current channel instead.
    pub channel_replies: HashMap<u16, LocalMsg>,
    /// Delay before a scripted response is delivered.
    pub resp_delay: Duration,
    /// Clock offset applied to injected message timestamps.
    pub resp_ts_diff_ms: i64,
    /// Time unit for injected message timestamps.
    pub resp_time_unit: Duration,

    pub sent_log: Vec<LocalMsg>,
    pub channels_log: Vec<u16>,
    /// Receive return codes of injected responses (true for success).
    pub resp_succ_log: Vec<bool>,

    receiver: Option<Arc<dyn LocalReceiver>>,
}

pub struct MockLocalLayer {
    weak: Weak<MockLocalLayer>,
    next_id: AtomicU16,
    state: Mutex<MockState>,
}

impl MockLocalLayer {
    pub fn new() -> Arc<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            next_id: AtomicU16::new(0),
            state: Mutex::new(MockState {
                send_result: Ok(()),
                set_channel_result: Ok(()),
                channels: Vec::new(),
                responses: VecDeque::new(),
                channel_replies: HashMap::new(),
                resp_delay: Duration::ZERO,
                resp_ts_diff_ms: 0,
                resp_time_unit: Duration::from_millis(10),
                sent_log: Vec::new(),
                channels_log: Vec::new(),
                resp_succ_log: Vec::new(),
                receiver: None,
            }),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().expect("mock state lock"))
    }

    pub fn push_response(&self, msg: LocalMsg) {
        self.with(|s| s.responses.push_back(msg));
    }

    pub fn sent_log(&self) -> Vec<LocalMsg> {
        self.with(|s| s.sent_log.clone())
    }

    pub fn channels_log(&self) -> Vec<u16> {
        self.with(|s| s.channels_log.clone())
    }

    pub fn resp_succ_log(&self) -> Vec<bool> {
        self.with(|s| s.resp_succ_log.clone())
    }

    pub fn receiver_set(&self) -> bool {
        self.with(|s| s.receiver.is_some())
    }

    /// Stamps `msg` like a real peer would: fresh ID, current timestamp in
    /// the mock's configured unit and offset.
    pub fn stamp(&self, msg: &mut LocalMsg) {
        let (diff, unit) = self.with(|s| (s.resp_ts_diff_ms, s.resp_time_unit));
        msg.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        msg.ts = unit_timestamp(diff, unit);
    }

    /// Delivers `msg` to the registered receiver, as the layer would on
    /// reception. Returns `Ok` when no receiver is attached.
    pub async fn recv(&self, msg: LocalMsg) -> Result<()> {
        let receiver = self.with(|s| s.receiver.clone());
        match receiver {
            Some(receiver) => receiver.recv_local(msg).await,
            None => Ok(()),
        }
    }

    async fn simulate_response(self: Arc<Self>, mut resp: LocalMsg) {
        let delay = self.with(|s| s.resp_delay);
        tokio::time::sleep(delay).await;
        self.stamp(&mut resp);
        let result = self.recv(resp).await;
        self.with(|s| s.resp_succ_log.push(result.is_ok()));
    }
}

#[async_trait]
impl LocalLayer for MockLocalLayer {
    async fn send(&self, msg: &LocalMsg) -> Result<()> {
        let (result, resp) = {
            let mut s = self.state.lock().expect("mock state lock");
            s.sent_log.push(msg.clone());

            let resp = if s.channel_replies.is_empty() {
                s.responses.pop_front()
            } else {
                s.channels_log
                    .last()
                    .and_then(|ch| s.channel_replies.get(ch).cloned())
            };
            (s.send_result, resp)
        };

        if let Some(mut resp) = resp {
            resp.req_id = msg.id;
            let this = self.weak.upgrade().expect("mock layer alive");
            tokio::spawn(this.simulate_response(resp));
        }

        result
    }

    fn channels(&self) -> Vec<u16> {
        self.with(|s| s.channels.clone())
    }

    async fn set_channel(&self, channel: u16) -> Result<()> {
        self.with(|s| {
            s.channels_log.push(channel);
            s.set_channel_result
        })
    }

    fn set_receiver(&self, receiver: Option<Arc<dyn LocalReceiver>>) {
        self.with(|s| s.receiver = receiver);
    }
}

// ---------------------------------------------------------------------------
// Fixture peers and messages, shared across the suites.
// ---------------------------------------------------------------------------

pub const TOPIC1: &str = "abc";
pub const TOPIC2: &str = "def";
pub const PAYLOAD1: &str = "payload1";
pub const PAYLOAD2: &str = "payload2";

pub fn peer(bytes: &[u8], channel: u16, pref: i16) -> LocalPeer {
    LocalPeer {
        addr: LocalAddr(bytes.to_vec()),
        channel,
        pref,
        ..Default::default()
    }
}

pub fn gw1() -> LocalPeer {
    peer(&[1], 1, 100)
}

pub fn gw2() -> LocalPeer {
    peer(&[2, 1, 2, 3], 2, 200)
}

pub fn gw3() -> LocalPeer {
    peer(&[3, 11, 22, 33, 44], 31, 300)
}

pub fn gw4() -> LocalPeer {
    peer(&[4, 19, 90, 38, 19], 99, 250)
}

pub fn relay1() -> LocalPeer {
    peer(&[5, 93, 1, 29], 42, 50)
}

pub fn pub_data1() -> PubData {
    PubData::new(TOPIC1, PAYLOAD1)
}

pub fn pub_data2() -> PubData {
    PubData::new(TOPIC2, PAYLOAD2)
}

/// Broadcast probe request, as the client sends it.
pub fn probe_req() -> LocalMsg {
    LocalMsg::new(LocalMsgType::ProbeReq)
}

/// Unicast probe request towards `peer`.
pub fn probe_req_to(peer: &LocalPeer) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        ..LocalMsg::new(LocalMsgType::ProbeReq)
    }
}

/// Probe response from `peer` carrying its preference.
pub fn probe_res(peer: &LocalPeer) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        node_type: NodeType::Gateway,
        pref: peer.pref,
        ..LocalMsg::new(LocalMsgType::ProbeRes)
    }
}

pub fn probe_res_from_relay(peer: &LocalPeer) -> LocalMsg {
    LocalMsg {
        node_type: NodeType::Relay,
        ..probe_res(peer)
    }
}

pub fn probe_res_with(peer: &LocalPeer, rssi: i16, ts_diff_ms: i64) -> LocalMsg {
    LocalMsg {
        rssi,
        ts_diff_ms,
        ..probe_res(peer)
    }
}

pub fn ok_from(peer: &LocalPeer) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        node_type: NodeType::Gateway,
        ..LocalMsg::new(LocalMsgType::Ok)
    }
}

pub fn fail_from(peer: &LocalPeer, reason: LocalMsgFailReason) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        node_type: NodeType::Gateway,
        fail_reason: reason,
        ..LocalMsg::new(LocalMsgType::Fail)
    }
}

pub fn pub_msg_to(peer: &LocalPeer, pubs: Vec<PubData>) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        pubs,
        ..LocalMsg::new(LocalMsgType::PubSubUnsub)
    }
}

pub fn sub_msg_to(peer: &LocalPeer, subs: &[&str]) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        subs: subs.iter().map(|s| s.to_string()).collect(),
        ..LocalMsg::new(LocalMsgType::PubSubUnsub)
    }
}

pub fn unsub_msg_to(peer: &LocalPeer, unsubs: &[&str]) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        unsubs: unsubs.iter().map(|s| s.to_string()).collect(),
        ..LocalMsg::new(LocalMsgType::PubSubUnsub)
    }
}

pub fn ok_to_gw(peer: &LocalPeer) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        ..LocalMsg::new(LocalMsgType::Ok)
    }
}

pub fn sub_data_msg(peer: &LocalPeer, data: Vec<SubData>) -> LocalMsg {
    LocalMsg {
        addr: peer.addr.clone(),
        node_type: NodeType::Gateway,
        subs_data: data,
        ..LocalMsg::new(LocalMsgType::SubData)
    }
}

/// `subscribe` sets are order-free on the wire; compare both orders.
pub fn sub_msg_either(sent: &LocalMsg, peer: &LocalPeer, a: &str, b: &str) -> bool {
    *sent == sub_msg_to(peer, &[a, b]) || *sent == sub_msg_to(peer, &[b, a])
}

pub fn unsub_msg_either(sent: &LocalMsg, peer: &LocalPeer, a: &str, b: &str) -> bool {
    *sent == unsub_msg_to(peer, &[a, b]) || *sent == unsub_msg_to(peer, &[b, a])
}
