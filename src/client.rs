//! Client node.
//!
//! A [`Client`] talks to a single gateway over the local layer: it discovers
//! one (probing every available channel and picking the candidate with the
//! highest preference), keeps its clock offset fresh through periodic time
//! sync, sends publish/subscribe/unsubscribe requests with reliable
//! request/response delivery, receives pushed subscription data, renews its
//! subscriptions before their gateway-side lease expires, and rediscovers a
//! replacement gateway in the background after sustained failures.
//!
//! ## Concurrency
//!
//! All public methods take `&self` and are safe to call concurrently; share
//! the client through an `Arc` if needed. Internally two locks exist: a fine
//! `std` mutex over the bookkeeping state (gateway, pending requests,
//! subscription database, counters) that is never held across an await —
//! so it is provably released before any call into the local layer — and a
//! coarse async mutex serializing gateway discovery and time sync against
//! each other.
//!
//! Background work runs on three kinds of tasks: the subscription-renewal
//! and time-sync [`Timer`]s, and the gateway watchdog, which parks on a
//! notification and runs an unbounded rediscovery whenever failure counters
//! cross their thresholds. User-facing calls never block on rediscovery.
//!
//! ## Lifecycle
//!
//! [`Client::connect`] performs the initial discovery and fails when no
//! gateway answers; [`Client::resume`] first tries to reuse a retained
//! gateway and falls back to discovery. [`Client::shutdown`] cancels
//! background work, detaches from the local layer and waits for in-flight
//! operations to unwind. Dropping an un-shutdown client tears the same
//! things down without waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::VERSION;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::layers::{LocalLayer, LocalReceiver};
use crate::local_addr::LocalAddr;
use crate::local_msg::{LocalMsg, LocalMsgType, MSG_RSSI_UNKNOWN, NodeType};
use crate::local_peer::{LocalPeer, RetainedLocalPeer};
use crate::node::NodeCore;
use crate::pub_sub::{PubData, SubCb, SubReq};
use crate::time::{set_system_time, steady_time, unit_timestamp};
use crate::timer::Timer;
use crate::wildcard_trie::WildcardTrie;

const LOCK_POISONED: &str = "client state lock poisoned";

/// Client state snapshot for deep sleep.
///
/// Fixed-size and pointer-free so it can live in RTC memory while the rest
/// of the system is powered down. Passing it to [`Client::resume`] skips the
/// full gateway discovery when the retained gateway still answers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRetainedData {
    pub gw: RetainedLocalPeer,
    pub msgs_fail_cnt: u16,
    pub time_sync_no_resp_cnt: u16,
}

/// A sent message waiting for its response(s).
struct PendingMsg {
    req_type: LocalMsgType,
    req_addr: LocalAddr,
    broadcast: bool,
    resps: Vec<LocalMsg>,
    /// One-shot completion for unicast requests; broadcast windows close by
    /// the sender's own sleep instead.
    completion: Option<oneshot::Sender<()>>,
}

/// Bookkeeping behind the fine mutex.
struct ClientState {
    gw: LocalPeer,
    pending: HashMap<u16, PendingMsg>,
    sub_db: WildcardTrie<SubCb>,
    /// Unicast messages failed or unanswered in a row.
    msgs_fail_cnt: u16,
    /// Time syncs without response in a row.
    time_sync_no_resp_cnt: u16,
    /// Skip timestamp validation; set during bootstrap and discovery scans,
    /// when no trustworthy clock offset exists yet.
    ignore_invalid_ts: bool,
    /// Cleared by shutdown; discovery loops and the watchdog exit on it.
    run: bool,
}

struct ClientInner {
    core: NodeCore,
    conf: ClientConfig,
    local: Arc<dyn LocalLayer>,
    state: Mutex<ClientState>,
    /// Serializes gateway discoveries and time syncs.
    dscv_sync: tokio::sync::Mutex<()>,
    /// Interrupts the discovery backoff sleep.
    dscv_cancel: Notify,
    /// Wakes the gateway watchdog.
    gw_wd: Notify,
    sub_db_timer: Mutex<Option<Timer>>,
    time_sync_timer: Mutex<Option<Timer>>,
    wd_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Receiver handle registered with the local layer. Holds the client weakly
/// so a registration left behind can't keep a dead client alive.
struct ClientReceiver(Weak<ClientInner>);

#[async_trait]
impl LocalReceiver for ClientReceiver {
    async fn recv_local(&self, msg: LocalMsg) -> Result<()> {
        match self.0.upgrade() {
            Some(inner) => inner.recv_local(msg).await,
            None => Err(Error::GenericFailure),
        }
    }
}

/// Client node handle. See the [module docs](self) for an overview.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client and performs the initial gateway discovery with up
    /// to `gw_dscv.initial_dscv_fail_thres` attempts.
    ///
    /// Fails with [`Error::TooManyFailedAttempts`] when no gateway answers,
    /// or [`Error::InvalidArg`] on broken configuration (zero
    /// `msg_id_cache.max_age`, colliding topic tokens).
    pub async fn connect(conf: ClientConfig, local: Arc<dyn LocalLayer>) -> Result<Self> {
        Self::start(conf, local, ClientRetainedData::default()).await
    }

    /// Creates a client from a deep-sleep snapshot.
    ///
    /// When the snapshot carries a gateway address, the client restores the
    /// channel and runs a single time sync against it; only if that fails
    /// does it fall back to full discovery.
    pub async fn resume(
        conf: ClientConfig,
        local: Arc<dyn LocalLayer>,
        retained: ClientRetainedData,
    ) -> Result<Self> {
        Self::start(conf, local, retained).await
    }

    async fn start(
        conf: ClientConfig,
        local: Arc<dyn LocalLayer>,
        retained: ClientRetainedData,
    ) -> Result<Self> {
        let core = NodeCore::new(conf.node.clone())?;
        let sub_db = WildcardTrie::new(
            conf.node.topic_sep.level_separator.clone(),
            conf.node.topic_sep.single_level_wildcard.clone(),
            conf.node.topic_sep.multi_level_wildcard.clone(),
        )?;

        let inner = Arc::new(ClientInner {
            core,
            conf: conf.clone(),
            local: Arc::clone(&local),
            state: Mutex::new(ClientState {
                gw: LocalPeer::default(),
                pending: HashMap::new(),
                sub_db,
                msgs_fail_cnt: 0,
                time_sync_no_resp_cnt: 0,
                ignore_invalid_ts: true,
                run: true,
            }),
            dscv_sync: tokio::sync::Mutex::new(()),
            dscv_cancel: Notify::new(),
            gw_wd: Notify::new(),
            sub_db_timer: Mutex::new(None),
            time_sync_timer: Mutex::new(None),
            wd_handle: Mutex::new(None),
        });

        info!(version = VERSION, "client starting");

        let receiver: Arc<dyn LocalReceiver> = Arc::new(ClientReceiver(Arc::downgrade(&inner)));
        local.set_receiver(Some(receiver));

        let mut initialized = false;
        if retained.gw.addr_len > 0 {
            debug!("using retained gateway data");
            {
                let mut state = inner.state.lock().expect(LOCK_POISONED);
                state.gw = retained.gw.unretain();
                state.msgs_fail_cnt = retained.msgs_fail_cnt;
                state.time_sync_no_resp_cnt = retained.time_sync_no_resp_cnt;
            }

            let mut channel_ok = true;
            if retained.gw.channel > 0 {
                debug!(channel = retained.gw.channel, "restoring local layer channel");
                if let Err(e) = local.set_channel(retained.gw.channel).await {
                    warn!(error = %e, "failed to restore channel");
                    channel_ok = false;
                }
            }

            if channel_ok {
                match inner.sync_time().await {
                    Ok(()) => {
                        let gw = inner.state.lock().expect(LOCK_POISONED).gw.clone();
                        info!(gw = %gw, "time sync successful");
                        initialized = true;
                    }
                    Err(e) => {
                        warn!(error = %e, "time sync failed, doing gateway discovery");
                    }
                }
            }
        }

        if !initialized {
            match inner
                .discover_gateway(conf.gw_dscv.initial_dscv_fail_thres as usize)
                .await
            {
                Ok(()) => {
                    let gw = inner.state.lock().expect(LOCK_POISONED).gw.clone();
                    info!(gw = %gw, "gateway discovery successful");
                }
                Err(e) => {
                    local.set_receiver(None);
                    return Err(e);
                }
            }
        }

        inner.state.lock().expect(LOCK_POISONED).ignore_invalid_ts = false;

        // Gateway watchdog: parked until a failure counter crosses its
        // threshold, then rediscovers for as long as it takes.
        let wd = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move { inner.gw_watchdog().await })
        };
        *inner.wd_handle.lock().expect(LOCK_POISONED) = Some(wd);

        // Periodic work holds the client weakly; timers die with it.
        if !conf.sub_db.sub_lifetime.is_zero() {
            let weak = Arc::downgrade(&inner);
            let timer = Timer::spawn(conf.sub_db.sub_lifetime, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.sub_db_tick().await;
                    }
                }
            });
            *inner.sub_db_timer.lock().expect(LOCK_POISONED) = Some(timer);
        }
        if !conf.time_sync.reprobe_gateway_interval.is_zero() {
            let weak = Arc::downgrade(&inner);
            let timer = Timer::spawn(conf.time_sync.reprobe_gateway_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = inner.sync_time().await;
                    }
                }
            });
            *inner.time_sync_timer.lock().expect(LOCK_POISONED) = Some(timer);
        }

        info!("client initialized");
        Ok(Self { inner })
    }

    /// Publishes `payload` to `topic`.
    ///
    /// Success means the local layer accepted the message **and** the
    /// gateway acknowledged it with `OK`.
    pub async fn publish(&self, topic: impl Into<String>, payload: impl Into<String>) -> Result<()> {
        self.publish_data(PubData {
            topic: topic.into(),
            payload: payload.into(),
        })
        .await
    }

    /// Publishes a single [`PubData`].
    pub async fn publish_data(&self, data: PubData) -> Result<()> {
        self.pub_sub_unsub_bulk(vec![data], Vec::new(), Vec::new()).await
    }

    /// Publishes several payloads in one message.
    pub async fn publish_bulk(&self, pubs: Vec<PubData>) -> Result<()> {
        self.pub_sub_unsub_bulk(pubs, Vec::new(), Vec::new()).await
    }

    /// Subscribes to `topic`; `cb` fires for every delivered message whose
    /// topic matches.
    pub async fn subscribe(&self, topic: impl Into<String>, cb: SubCb) -> Result<()> {
        self.subscribe_bulk(vec![SubReq::new(topic, cb)]).await
    }

    /// Subscribes to several topics in one message.
    pub async fn subscribe_bulk(&self, subs: Vec<SubReq>) -> Result<()> {
        self.pub_sub_unsub_bulk(Vec::new(), subs, Vec::new()).await
    }

    /// Unsubscribes from `topic`.
    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<()> {
        self.unsubscribe_bulk(vec![topic.into()]).await
    }

    /// Unsubscribes from several topics in one message.
    pub async fn unsubscribe_bulk(&self, unsubs: Vec<String>) -> Result<()> {
        self.pub_sub_unsub_bulk(Vec::new(), Vec::new(), unsubs).await
    }

    /// Publishes, subscribes and unsubscribes in one message.
    ///
    /// Empty input is a no-op success. On `OK` the local subscription
    /// database is updated (unsubscriptions removed, subscriptions added);
    /// any failure leaves it untouched.
    pub async fn pub_sub_unsub_bulk(
        &self,
        pubs: Vec<PubData>,
        subs: Vec<SubReq>,
        unsubs: Vec<String>,
    ) -> Result<()> {
        self.inner.pub_sub_unsub_bulk(pubs, subs, unsubs).await
    }

    /// Unsubscribes from every topic in the local database. On `OK` the
    /// database is cleared.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        self.inner.unsubscribe_all().await
    }

    /// Re-announces every local subscription to the gateway. Local state is
    /// not modified.
    pub async fn resubscribe_all(&self) -> Result<()> {
        self.inner.resubscribe_all().await
    }

    /// Discovers a gateway and makes it current.
    ///
    /// Probes every channel of the local layer per attempt and picks the
    /// response with the highest preference. Between failed attempts sleeps
    /// with exponential backoff from `dscv_min_delay` up to
    /// `dscv_max_delay`. `max_attempts` 0 retries indefinitely.
    pub async fn discover_gateway(&self, max_attempts: usize) -> Result<()> {
        self.inner.discover_gateway(max_attempts).await
    }

    /// Synchronizes time with the current gateway and reschedules the next
    /// periodic sync to one full interval from now.
    pub async fn sync_time(&self) -> Result<()> {
        self.inner.sync_time().await
    }

    /// Snapshot for [`Client::resume`] after deep sleep.
    pub fn retain(&self) -> ClientRetainedData {
        let state = self.inner.state.lock().expect(LOCK_POISONED);
        ClientRetainedData {
            gw: state.gw.retain(),
            msgs_fail_cnt: state.msgs_fail_cnt,
            time_sync_no_resp_cnt: state.time_sync_no_resp_cnt,
        }
    }

    /// Stops background work, detaches from the local layer and waits for
    /// in-flight discovery or sync to finish.
    pub async fn shutdown(&self) {
        self.inner.state.lock().expect(LOCK_POISONED).run = false;

        debug!("waiting for gateway discovery and watchdog");
        self.inner.dscv_cancel.notify_one();
        self.inner.gw_wd.notify_one();

        let wd = self.inner.wd_handle.lock().expect(LOCK_POISONED).take();
        if let Some(wd) = wd {
            let _ = wd.await;
        }

        let sub_timer = self.inner.sub_db_timer.lock().expect(LOCK_POISONED).take();
        if let Some(timer) = sub_timer {
            timer.quit().await;
        }
        let ts_timer = self.inner.time_sync_timer.lock().expect(LOCK_POISONED).take();
        if let Some(timer) = ts_timer {
            timer.quit().await;
        }

        self.inner.local.set_receiver(None);

        // Wait out anything still inside discovery/sync or the state lock.
        let _sync = self.inner.dscv_sync.lock().await;
        drop(self.inner.state.lock().expect(LOCK_POISONED));

        info!("client deinitialized");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Best effort for clients dropped without `shutdown()`; all of this
        // is idempotent after a shutdown.
        if let Ok(mut state) = self.inner.state.lock() {
            state.run = false;
        }
        self.inner.dscv_cancel.notify_one();
        self.inner.gw_wd.notify_one();
        if let Ok(mut handle) = self.inner.wd_handle.lock()
            && let Some(wd) = handle.take()
        {
            wd.abort();
        }
        if let Ok(mut timer) = self.inner.sub_db_timer.lock() {
            timer.take();
        }
        if let Ok(mut timer) = self.inner.time_sync_timer.lock() {
            timer.take();
        }
        self.inner.local.set_receiver(None);
    }
}

impl ClientInner {
    fn running(&self) -> bool {
        self.state.lock().expect(LOCK_POISONED).run
    }

    /// Fills in the transmission fields: destination, fresh ID, timestamp in
    /// the gateway's clock, node type.
    fn prepare_msg(&self, state: &ClientState, msg: &mut LocalMsg, broadcast: bool) {
        msg.addr = if broadcast {
            LocalAddr::default()
        } else {
            state.gw.addr.clone()
        };
        msg.id = self.core.next_msg_id();
        msg.ts = unit_timestamp(state.gw.ts_diff_ms, self.core.time_unit());
        msg.node_type = NodeType::Client;
    }

    /// Sends a unicast request and waits for its response, mapping `FAIL`
    /// responses to [`Error::MsgProcessingFailed`] and keeping the failed
    /// messages counter. Crossing `trig_msgs_fail_cnt` wakes the watchdog.
    async fn send_local(&self, msg: LocalMsg) -> Result<LocalMsg> {
        match self.send_local_unchecked(msg, false).await {
            Ok(resp) if resp.msg_type == LocalMsgType::Fail => {
                warn!(reason = %resp.fail_reason, "message delivery failed");
                self.note_msg_failure();
                Err(Error::MsgProcessingFailed)
            }
            Ok(resp) => {
                self.state.lock().expect(LOCK_POISONED).msgs_fail_cnt = 0;
                Ok(resp)
            }
            Err(e) => {
                self.note_msg_failure();
                Err(e)
            }
        }
    }

    fn note_msg_failure(&self) {
        let trigger = {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            state.msgs_fail_cnt = state.msgs_fail_cnt.saturating_add(1);
            let thres = self.conf.gw_dscv.trig_msgs_fail_cnt;
            thres == 0 || state.msgs_fail_cnt >= thres
        };
        if trigger {
            warn!("too many failed messages, triggering background gateway discovery");
            self.gw_wd.notify_one();
        }
    }

    /// Unchecked unicast send: prepares the message, registers it in the
    /// pending table, dispatches and waits for the response. With `no_resp`
    /// it is fire-and-forget and nothing is registered.
    async fn send_local_unchecked(&self, mut msg: LocalMsg, no_resp: bool) -> Result<LocalMsg> {
        let completion = {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            self.prepare_msg(&state, &mut msg, false);
            if msg.addr.is_empty() {
                return Err(Error::NoGateway);
            }
            if no_resp {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.pending.insert(
                    msg.id,
                    PendingMsg {
                        req_type: msg.msg_type,
                        req_addr: msg.addr.clone(),
                        broadcast: false,
                        resps: Vec::new(),
                        completion: Some(tx),
                    },
                );
                Some(rx)
            }
        };

        debug!(id = msg.id, msg = %msg, "sending message");

        if let Err(e) = self.local.send(&msg).await {
            if completion.is_some() {
                self.state.lock().expect(LOCK_POISONED).pending.remove(&msg.id);
            }
            return Err(e);
        }

        let Some(completion) = completion else {
            debug!(id = msg.id, "not waiting for response");
            return Ok(LocalMsg::default());
        };

        let resp_timeout = self.conf.node.local_delivery.resp_timeout;
        match timeout(resp_timeout, completion).await {
            Ok(Ok(())) => {
                let mut state = self.state.lock().expect(LOCK_POISONED);
                let resp = state
                    .pending
                    .remove(&msg.id)
                    .and_then(|pending| pending.resps.into_iter().next())
                    .ok_or(Error::Timeout)?;
                debug!(id = msg.id, resp = %resp, "response received");
                Ok(resp)
            }
            _ => {
                self.state.lock().expect(LOCK_POISONED).pending.remove(&msg.id);
                warn!(id = msg.id, msg = %msg, "response timeout");
                Err(Error::Timeout)
            }
        }
    }

    /// Unchecked broadcast send: dispatches, then keeps the collection
    /// window open for a full response timeout and returns everything that
    /// arrived.
    async fn send_local_unchecked_broadcast(&self, mut msg: LocalMsg) -> Result<Vec<LocalMsg>> {
        {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            self.prepare_msg(&state, &mut msg, true);
            state.pending.insert(
                msg.id,
                PendingMsg {
                    req_type: msg.msg_type,
                    req_addr: LocalAddr::default(),
                    broadcast: true,
                    resps: Vec::new(),
                    completion: None,
                },
            );
        }

        debug!(id = msg.id, msg = %msg, "broadcasting message");

        if let Err(e) = self.local.send(&msg).await {
            self.state.lock().expect(LOCK_POISONED).pending.remove(&msg.id);
            return Err(e);
        }

        sleep(self.conf.node.local_delivery.resp_timeout).await;

        let mut state = self.state.lock().expect(LOCK_POISONED);
        let resps = state
            .pending
            .remove(&msg.id)
            .map(|pending| pending.resps)
            .unwrap_or_default();
        for resp in &resps {
            debug!(id = msg.id, resp = %resp, "broadcast response");
        }
        Ok(resps)
    }

    /// Entry point for everything the local layer delivers.
    async fn recv_local(&self, msg: LocalMsg) -> Result<()> {
        if msg.node_type != NodeType::Gateway && msg.node_type != NodeType::Relay {
            debug!(msg = %msg, "received message from invalid node type");
            return Err(Error::InvalidArg);
        }

        match msg.msg_type {
            LocalMsgType::Ok | LocalMsgType::Fail | LocalMsgType::ProbeRes => {
                self.recv_local_resp(msg)
            }
            LocalMsgType::SubData => self.recv_local_sub_data(msg).await,
            _ => {
                warn!(msg = %msg, "received unknown message");
                Err(Error::InvalidArg)
            }
        }
    }

    /// Correlates a response with its pending request.
    fn recv_local_resp(&self, msg: LocalMsg) -> Result<()> {
        let mut state = self.state.lock().expect(LOCK_POISONED);

        if !self.core.validate_msg_id(&msg.addr, msg.id) {
            debug!(msg = %msg, "discarding response with duplicate ID");
            return Err(Error::MsgDupId);
        }
        if !state.ignore_invalid_ts
            && !self.core.validate_msg_timestamp(msg.ts, state.gw.ts_diff_ms)
        {
            debug!(msg = %msg, "discarding response with invalid timestamp");
            return Err(Error::MsgInvalidTs);
        }

        let Some(pending) = state.pending.get_mut(&msg.req_id) else {
            debug!(msg = %msg, "discarding response for non-existing request");
            return Err(Error::NotFound);
        };

        if !pending.broadcast && pending.req_addr != msg.addr {
            debug!(msg = %msg, "discarding response from different address");
            return Err(Error::MsgUnknownSender);
        }

        let accepted = matches!(
            (pending.req_type, msg.msg_type),
            (LocalMsgType::PubSubUnsub, LocalMsgType::Ok)
                | (LocalMsgType::PubSubUnsub, LocalMsgType::Fail)
                | (LocalMsgType::ProbeReq, LocalMsgType::Fail)
                | (LocalMsgType::ProbeReq, LocalMsgType::ProbeRes)
        );
        if !accepted {
            debug!(
                resp = %msg.msg_type,
                req = %pending.req_type,
                "response type invalid for request type"
            );
            return Err(Error::InvalidArg);
        }

        let broadcast = pending.broadcast;
        pending.resps.push(msg);
        if !broadcast
            && let Some(tx) = pending.completion.take()
        {
            let _ = tx.send(());
        }
        Ok(())
    }

    /// Handles pushed subscription data: validate, acknowledge, fan out to
    /// matching local subscriptions.
    async fn recv_local_sub_data(&self, msg: LocalMsg) -> Result<()> {
        debug!(msg = %msg, "received subscription data");

        let (id_valid, ts_valid, sender_valid) = {
            let state = self.state.lock().expect(LOCK_POISONED);
            (
                self.core.validate_msg_id(&msg.addr, msg.id),
                self.core.validate_msg_timestamp(msg.ts, state.gw.ts_diff_ms),
                msg.addr == state.gw.addr,
            )
        };

        if !id_valid || !ts_valid {
            debug!(msg = %msg, "message is invalid, discarding");
            return Err(if !id_valid {
                Error::MsgDupId
            } else {
                Error::MsgInvalidTs
            });
        }
        if !sender_valid {
            debug!(msg = %msg, "discarding data from unknown sender");
            return Err(Error::MsgUnknownSender);
        }

        // Acknowledge the delivery, fire and forget.
        let mut ack = LocalMsg::new(LocalMsgType::Ok);
        ack.req_id = msg.id;
        if let Err(e) = self.send_local_unchecked(ack, true).await {
            warn!(error = %e, "failed to acknowledge subscription data");
        }

        for sub_data in &msg.subs_data {
            let callbacks: Vec<(String, SubCb)> = {
                let state = self.state.lock().expect(LOCK_POISONED);
                state
                    .sub_db
                    .find(&sub_data.topic)
                    .into_iter()
                    .map(|(topic, cb)| (topic, Arc::clone(cb)))
                    .collect()
            };
            for (topic, cb) in callbacks {
                debug!(topic = %topic, "calling user callback");
                cb(sub_data);
            }
        }

        Ok(())
    }

    async fn pub_sub_unsub_bulk(
        &self,
        pubs: Vec<PubData>,
        subs: Vec<SubReq>,
        unsubs: Vec<String>,
    ) -> Result<()> {
        if pubs.is_empty() && subs.is_empty() && unsubs.is_empty() {
            return Ok(());
        }

        let mut msg = LocalMsg::new(LocalMsgType::PubSubUnsub);
        msg.pubs = pubs;
        msg.subs = subs.iter().map(|sub| sub.topic.clone()).collect();
        msg.unsubs = unsubs.clone();

        let resp = self.send_local(msg).await?;
        if resp.msg_type != LocalMsgType::Ok {
            warn!(resp = %resp, "received non-OK response");
            return Err(Error::MsgProcessingFailed);
        }

        let mut state = self.state.lock().expect(LOCK_POISONED);
        for topic in &unsubs {
            if !state.sub_db.remove(topic) {
                debug!(topic = %topic, "can't unsubscribe from not-subscribed topic");
            }
        }
        for sub in subs {
            state.sub_db.insert(&sub.topic, sub.cb);
        }
        Ok(())
    }

    fn sub_topics(&self) -> Vec<String> {
        let state = self.state.lock().expect(LOCK_POISONED);
        let mut topics = Vec::new();
        state.sub_db.for_each(|topic, _| topics.push(topic.to_string()));
        topics
    }

    async fn unsubscribe_all(&self) -> Result<()> {
        let topics = self.sub_topics();
        if topics.is_empty() {
            return Ok(());
        }

        let mut msg = LocalMsg::new(LocalMsgType::PubSubUnsub);
        msg.unsubs = topics;

        let resp = self.send_local(msg).await?;
        if resp.msg_type != LocalMsgType::Ok {
            warn!(resp = %resp, "received non-OK response");
            return Err(Error::MsgProcessingFailed);
        }

        self.state.lock().expect(LOCK_POISONED).sub_db.clear();
        Ok(())
    }

    async fn resubscribe_all(&self) -> Result<()> {
        let topics = self.sub_topics();
        if topics.is_empty() {
            return Ok(());
        }

        let mut msg = LocalMsg::new(LocalMsgType::PubSubUnsub);
        msg.subs = topics;

        let resp = self.send_local(msg).await?;
        if resp.msg_type != LocalMsgType::Ok {
            warn!(resp = %resp, "received non-OK response");
            return Err(Error::MsgProcessingFailed);
        }
        Ok(())
    }

    async fn discover_gateway(&self, max_attempts: usize) -> Result<()> {
        let mut attempts = 0usize;
        let mut delay = self.conf.gw_dscv.dscv_min_delay;
        let channels = self.local.channels();

        debug!(max_attempts, "gateway discovery started");

        while max_attempts == 0 || attempts < max_attempts {
            debug!(attempt = attempts + 1, "discovery attempt started");

            {
                let _sync = self.dscv_sync.lock().await;

                // Only discovery and the constructor toggle this flag, both
                // behind the discovery/sync lock.
                self.state.lock().expect(LOCK_POISONED).ignore_invalid_ts = true;

                let mut best = LocalPeer::default();
                let mut rssi_reports: HashMap<LocalAddr, i16> = HashMap::new();

                if channels.is_empty() {
                    debug!("probing default channel");
                    self.probe_channel(0, &mut best, &mut rssi_reports).await;
                } else {
                    for &channel in &channels {
                        if self.local.set_channel(channel).await.is_err() {
                            warn!(channel, "can't set channel, skipping it");
                            continue;
                        }
                        debug!(channel, "probing channel");
                        self.probe_channel(channel, &mut best, &mut rssi_reports).await;
                    }
                }

                self.state.lock().expect(LOCK_POISONED).ignore_invalid_ts = false;

                if !best.is_empty() {
                    if !channels.is_empty() {
                        let _ = self.local.set_channel(best.channel).await;
                    }
                    {
                        let mut state = self.state.lock().expect(LOCK_POISONED);
                        state.gw = best;
                        state.msgs_fail_cnt = 0;
                        state.time_sync_no_resp_cnt = 0;
                        info!(gw = %state.gw, "using new gateway");
                    }
                    debug!(attempt = attempts + 1, "discovery attempt successful");

                    if self.conf.reporting.rssi_on_gw_dscv && !rssi_reports.is_empty() {
                        self.report_rssi(rssi_reports).await;
                    }
                    return Ok(());
                }

                self.state.lock().expect(LOCK_POISONED).gw = LocalPeer::default();
            }

            debug!(attempt = attempts + 1, "discovery attempt failed");

            // Backoff, interruptible by shutdown.
            if !self.running() {
                debug!("gateway discovery cancelled by shutdown");
                return Ok(());
            }
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.dscv_cancel.notified() => {}
            }
            if !self.running() {
                debug!("gateway discovery cancelled by shutdown");
                return Ok(());
            }

            delay = (delay * 2).min(self.conf.gw_dscv.dscv_max_delay);
            attempts += 1;
        }

        warn!(attempts, "gateway discovery failed");
        Err(Error::TooManyFailedAttempts)
    }

    /// Broadcasts one probe on the current channel, folding responses into
    /// the best candidate and the RSSI report set.
    async fn probe_channel(
        &self,
        channel: u16,
        best: &mut LocalPeer,
        rssi_reports: &mut HashMap<LocalAddr, i16>,
    ) {
        let probe = LocalMsg::new(LocalMsgType::ProbeReq);
        let resps = match self.send_local_unchecked_broadcast(probe).await {
            Ok(resps) => resps,
            Err(e) => {
                warn!(error = %e, "probe broadcast failed");
                return;
            }
        };

        for resp in resps {
            if resp.rssi != MSG_RSSI_UNKNOWN {
                rssi_reports.insert(resp.addr.clone(), resp.rssi);
            }
            if resp.pref > best.pref {
                best.addr = resp.addr;
                best.channel = channel;
                best.pref = resp.pref;
                best.ts_diff_ms = resp.ts_diff_ms;
            }
        }
    }

    /// Publishes one RSSI report per probed peer in a single message.
    /// Failures only cost us the report.
    async fn report_rssi(&self, reports: HashMap<LocalAddr, i16>) {
        let mut msg = LocalMsg::new(LocalMsgType::PubSubUnsub);
        msg.pubs = reports
            .iter()
            .map(|(addr, rssi)| {
                PubData::new(self.core.build_report_rssi_topic(addr), rssi.to_string())
            })
            .collect();

        debug!(count = msg.pubs.len(), "reporting discovery RSSI");
        if let Err(e) = self.send_local(msg).await {
            warn!(error = %e, "RSSI report failed");
        }
    }

    async fn gw_watchdog(&self) {
        if !self.running() {
            debug!("watchdog cancelled early by shutdown");
            return;
        }
        loop {
            self.gw_wd.notified().await;
            if !self.running() {
                debug!("watchdog cancelled by shutdown");
                return;
            }
            let _ = self.discover_gateway(0).await;
        }
    }

    async fn sync_time(&self) -> Result<()> {
        let _sync = self.dscv_sync.lock().await;
        debug!("time sync started");

        // Postpone the upcoming periodic sync by a full interval.
        if let Some(timer) = self.time_sync_timer.lock().expect(LOCK_POISONED).as_ref() {
            timer.set_next_exec(Instant::now() + self.conf.time_sync.reprobe_gateway_interval);
        }

        let resp = match self.send_local(LocalMsg::new(LocalMsgType::ProbeReq)).await {
            Ok(resp) if resp.msg_type == LocalMsgType::ProbeRes => resp,
            Ok(resp) => {
                warn!(resp = %resp, "received invalid response");
                self.note_time_sync_failure();
                return Err(Error::MsgProcessingFailed);
            }
            Err(e) => {
                warn!(error = %e, "time sync probe failed");
                self.note_time_sync_failure();
                return Err(e);
            }
        };

        let ts_diff_ms = resp.ts_diff_ms;
        {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            state.gw.ts_diff_ms = ts_diff_ms;
            state.time_sync_no_resp_cnt = 0;
        }
        debug!(ts_diff_ms, "time sync successful");

        if self.conf.time_sync.sync_system_time {
            let now_ms = steady_time().as_millis() as i64 + ts_diff_ms;
            match set_system_time(now_ms) {
                Ok(()) => info!(timestamp_ms = now_ms, "system time set"),
                Err(e) => error!(error = %e, "setting system time failed"),
            }
        }

        Ok(())
    }

    fn note_time_sync_failure(&self) {
        let trigger = {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            state.time_sync_no_resp_cnt = state.time_sync_no_resp_cnt.saturating_add(1);
            let thres = self.conf.gw_dscv.trig_time_sync_no_resp_cnt;
            thres == 0 || state.time_sync_no_resp_cnt >= thres
        };
        if trigger {
            warn!("too many failed time syncs, triggering background gateway discovery");
            self.gw_wd.notify_one();
        }
    }

    /// Subscription renewal tick: re-announce all topics in one message.
    /// Failures are logged; the next tick retries.
    async fn sub_db_tick(&self) {
        debug!("subscription renewal running");

        let topics = self.sub_topics();
        if topics.is_empty() {
            debug!("nothing to renew");
            return;
        }

        let mut msg = LocalMsg::new(LocalMsgType::PubSubUnsub);
        msg.subs = topics;

        match self.send_local(msg).await {
            Ok(resp) if resp.msg_type == LocalMsgType::Ok => debug!("renewal done"),
            Ok(resp) => warn!(resp = %resp, "received non-OK renewal response"),
            Err(e) => warn!(error = %e, "error while sending renewal message"),
        }
    }
}
