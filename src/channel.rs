//! Channel builder and runtime loops.
//!
//! The [`ChannelBuilder`] configures handlers and limits; [`ChannelBuilder::start`]
//! takes an [`Endpoint`] and spawns two tasks:
//! 1. Receive loop: polls the incoming slot, copies each message out,
//!    hands the bytes to the handler and releases the slot
//! 2. Drain task: feeds queued messages to the outgoing slot
//!
//! The returned [`Channel`] sends directly or through the queue and tears
//! everything down on [`Channel::shutdown`].
//!
//! # Example
//!
//! ```ignore
//! use groupwire::{transport, Channel};
//!
//! #[tokio::main]
//! async fn main() -> groupwire::Result<()> {
//!     let (a, b) = transport::paired(4096, 4096)?;
//!
//!     let _echo = Channel::builder()
//!         .on_message(|bytes| println!("got {} bytes", bytes.len()))
//!         .start(b)
//!         .await?;
//!
//!     let channel = Channel::builder().start(a).await?;
//!     channel.send(&b"ping"[..]).await?;
//!     channel.shutdown().await
//! }
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::arbiter::{spawn_drain_task, DrainedCallback, Outbound, SendArbiter, SendQueue};
use crate::backpressure::{self, BackpressureController};
use crate::error::{GroupwireError, Result};
use crate::protocol::{DecodeSink, GroupDecoder, Packet, PayloadSource};
use crate::transport::{
    duration_ms, signal, wait_until, Endpoint, Incoming, PollConfig, PollSchedule, Role, Slot,
};

/// Default timeout for direct sends.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a creator waits for the shutdown acknowledgement.
pub const DEFAULT_SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Handler for raw incoming messages.
pub type MessageHandler = Box<dyn FnMut(Bytes) + Send>;

/// Channel settings.
///
/// Loadable from JSON with durations in milliseconds, e.g.
/// `{"send_timeout_ms": 1000, "max_pending": 64, "poll": {"idle_interval_us": 2000}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Polling cadence for the receive loop and handshake waits.
    pub poll: PollConfig,
    /// Timeout for `send` and `send_packets`.
    #[serde(rename = "send_timeout_ms", with = "duration_ms")]
    pub send_timeout: Duration,
    /// Time each queued message gets to reach the slot.
    #[serde(rename = "queue_send_timeout_ms", with = "duration_ms")]
    pub queue_send_timeout: Duration,
    /// Send queue length.
    pub max_pending: usize,
    /// How long `enqueue` waits on a full queue.
    #[serde(rename = "backpressure_timeout_ms", with = "duration_ms")]
    pub backpressure_timeout: Duration,
    /// How long a creator waits for the peer to acknowledge shutdown.
    #[serde(rename = "shutdown_ack_timeout_ms", with = "duration_ms")]
    pub shutdown_ack_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            queue_send_timeout: DEFAULT_SEND_TIMEOUT,
            max_pending: backpressure::DEFAULT_MAX_PENDING,
            backpressure_timeout: backpressure::DEFAULT_TIMEOUT,
            shutdown_ack_timeout: DEFAULT_SHUTDOWN_ACK_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// Parse from a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn validate(&self) -> Result<()> {
        if self.max_pending == 0 {
            return Err(GroupwireError::InvalidConfig(
                "max_pending must be at least 1".to_string(),
            ));
        }
        if self.poll.busy_interval.is_zero() || self.poll.idle_interval.is_zero() {
            return Err(GroupwireError::InvalidConfig(
                "poll intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Feeds every received message into a [`GroupDecoder`].
///
/// Messages may split or join frames freely; the decoder reassembles them.
pub struct PacketHandler<S> {
    decoder: GroupDecoder,
    sink: S,
}

impl<S: DecodeSink> PacketHandler<S> {
    /// Decode with default limits.
    pub fn new(sink: S) -> Self {
        Self::with_decoder(GroupDecoder::new(), sink)
    }

    /// Decode with a preconfigured decoder.
    pub fn with_decoder(decoder: GroupDecoder, sink: S) -> Self {
        Self { decoder, sink }
    }

    /// Decode one message.
    pub fn handle(&mut self, message: &[u8]) {
        match self.decoder.process(message, &mut self.sink) {
            Ok(report) if !report.is_clean() => {
                tracing::warn!(
                    discarded = report.discarded,
                    errors = report.errors.len(),
                    "Discarded corrupt frames"
                );
            }
            Ok(report) => {
                tracing::trace!(packets = report.packets, groups = report.groups, "Decoded message");
            }
            Err(e) => tracing::warn!(error = %e, "Decoder reset"),
        }
    }

    /// The decoder state.
    pub fn decoder(&self) -> &GroupDecoder {
        &self.decoder
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

/// Builder for a [`Channel`].
pub struct ChannelBuilder {
    handler: Option<MessageHandler>,
    on_drained: Option<DrainedCallback>,
    config: ChannelConfig,
}

impl ChannelBuilder {
    /// Create a builder with default settings and no handler.
    pub fn new() -> Self {
        Self {
            handler: None,
            on_drained: None,
            config: ChannelConfig::default(),
        }
    }

    /// Handle raw incoming messages.
    ///
    /// Runs on the receive task; a long-running handler delays the release
    /// of the next message.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Decode incoming messages as packet groups.
    pub fn on_packets<S>(self, sink: S) -> Self
    where
        S: DecodeSink + Send + 'static,
    {
        self.on_packets_with(GroupDecoder::new(), sink)
    }

    /// Decode incoming messages with a preconfigured decoder.
    pub fn on_packets_with<S>(self, decoder: GroupDecoder, sink: S) -> Self
    where
        S: DecodeSink + Send + 'static,
    {
        let mut packets = PacketHandler::with_decoder(decoder, sink);
        self.on_message(move |message: Bytes| packets.handle(&message))
    }

    /// Notify every time the send queue drains to empty.
    pub fn on_drained<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_drained = Some(Arc::new(callback));
        self
    }

    /// Replace all settings.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the polling cadence.
    pub fn poll_config(mut self, poll: PollConfig) -> Self {
        self.config.poll = poll;
        self
    }

    /// Set the direct send timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Set the per-message timeout of the drain task.
    pub fn queue_send_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_send_timeout = timeout;
        self
    }

    /// Set the send queue length.
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.max_pending = max;
        self
    }

    /// Set how long `enqueue` waits on a full queue.
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout = timeout;
        self
    }

    /// Set how long a creator waits for the shutdown acknowledgement.
    pub fn shutdown_ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_ack_timeout = timeout;
        self
    }

    /// Take over `endpoint` and spawn the receive loop and drain task.
    pub async fn start(self, endpoint: Endpoint) -> Result<Channel> {
        self.config.validate()?;
        let config = self.config;

        let closing = Arc::new(AtomicBool::new(false));
        let arbiter = Arc::new(SendArbiter::new(
            endpoint.tx().clone(),
            closing.clone(),
            config.poll,
        ));
        let backpressure =
            BackpressureController::with_timeout(config.max_pending, config.backpressure_timeout);
        let (queue, drain_task) = spawn_drain_task(
            arbiter.clone(),
            backpressure,
            config.queue_send_timeout,
            self.on_drained,
        );

        let handler: MessageHandler = match self.handler {
            Some(handler) => handler,
            None => Box::new(|message: Bytes| {
                tracing::trace!(len = message.len(), "Dropping message, no handler installed")
            }),
        };

        let (closed_tx, closed_rx) = watch::channel(false);
        let receive_task = tokio::spawn(receive_loop(
            endpoint.rx().clone(),
            handler,
            config.poll,
            closing.clone(),
            closed_tx,
        ));

        tracing::debug!(
            role = ?endpoint.role(),
            send_capacity = endpoint.send_capacity(),
            receive_capacity = endpoint.receive_capacity(),
            "Channel started"
        );

        Ok(Channel {
            endpoint,
            arbiter,
            queue,
            closing,
            closed: closed_rx,
            receive_task,
            drain_task,
            config,
        })
    }
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running channel over one endpoint.
///
/// Dropping a channel stops its tasks without the shutdown handshake; call
/// [`Channel::shutdown`] for an orderly teardown.
pub struct Channel {
    endpoint: Endpoint,
    arbiter: Arc<SendArbiter>,
    queue: SendQueue,
    closing: Arc<AtomicBool>,
    closed: watch::Receiver<bool>,
    receive_task: JoinHandle<()>,
    drain_task: JoinHandle<()>,
    config: ChannelConfig,
}

impl Channel {
    /// Create a builder.
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    /// Send raw bytes directly, waiting up to the configured send timeout.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<usize> {
        self.send_timeout(data, self.config.send_timeout).await
    }

    /// Send raw bytes directly with an explicit timeout.
    pub async fn send_timeout(&self, data: impl Into<Bytes>, timeout: Duration) -> Result<usize> {
        self.arbiter.send(Outbound::Bytes(data.into()), timeout).await
    }

    /// Encode a packet group straight into the slot.
    ///
    /// The end-of-group bit is set on the last packet only.
    pub async fn send_packets<P>(&self, packets: Vec<Packet<P>>) -> Result<usize>
    where
        P: PayloadSource + Send + 'static,
    {
        self.send_packets_timeout(packets, self.config.send_timeout).await
    }

    /// Encode a packet group with an explicit timeout.
    pub async fn send_packets_timeout<P>(
        &self,
        packets: Vec<Packet<P>>,
        timeout: Duration,
    ) -> Result<usize>
    where
        P: PayloadSource + Send + 'static,
    {
        let packets = packets.into_iter().map(Packet::into_boxed).collect();
        self.arbiter.send(Outbound::Packets(packets), timeout).await
    }

    /// Queue raw bytes for the drain task.
    pub async fn enqueue(&self, data: impl Into<Bytes>) -> Result<()> {
        self.queue.enqueue(Outbound::Bytes(data.into())).await
    }

    /// Queue a packet group for the drain task.
    pub async fn enqueue_packets<P>(&self, packets: Vec<Packet<P>>) -> Result<()>
    where
        P: PayloadSource + Send + 'static,
    {
        let packets = packets.into_iter().map(Packet::into_boxed).collect();
        self.queue.enqueue(Outbound::Packets(packets)).await
    }

    /// Messages queued but not yet handed to the slot.
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Check if the send queue is full.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.queue.is_backpressure_active()
    }

    /// Raise the ERROR status towards the creator.
    ///
    /// Only an acceptor has a status word.
    pub async fn report_error(&self) -> Result<()> {
        if self.endpoint.role() != Role::Acceptor {
            return Err(GroupwireError::InvalidConfig(format!(
                "{:?} endpoint cannot report errors",
                self.endpoint.role()
            )));
        }
        self.arbiter.signal_error(self.config.send_timeout).await
    }

    /// Which side this channel is on.
    #[inline]
    pub fn role(&self) -> Role {
        self.endpoint.role()
    }

    /// Largest message `send` accepts.
    #[inline]
    pub fn send_capacity(&self) -> usize {
        self.endpoint.send_capacity()
    }

    /// Active settings.
    #[inline]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// True once teardown started, locally or by the peer.
    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Wait until the receive loop has stopped (e.g. the peer sent shutdown).
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop both tasks and, as the creator, run the shutdown handshake.
    ///
    /// In-flight sends fail with `ShuttingDown` and queued messages are
    /// discarded. An unacknowledged shutdown is logged, not returned.
    pub async fn shutdown(mut self) -> Result<()> {
        self.closing.store(true, Ordering::Release);

        if let Err(e) = (&mut self.receive_task).await {
            if e.is_panic() {
                tracing::error!("Receive task panicked");
            }
        }
        // The drain task may be mid-publish on another worker; it must be
        // gone before SHUTDOWN lands on the command word.
        self.drain_task.abort();
        if let Err(e) = (&mut self.drain_task).await {
            if e.is_panic() {
                tracing::error!("Drain task panicked");
            }
        }
        let discarded = self.queue.pending();
        if discarded > 0 {
            tracing::debug!(discarded, "Discarding queued messages");
        }

        if self.endpoint.role() == Role::Creator {
            send_shutdown(self.endpoint.tx(), self.config.poll, self.config.shutdown_ack_timeout)
                .await;
        }

        tracing::debug!(role = ?self.endpoint.role(), "Channel shut down");
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
        self.drain_task.abort();
        self.receive_task.abort();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("role", &self.endpoint.role())
            .field("pending", &self.pending())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Store SHUTDOWN on the command word and wait for the peer to clear it.
async fn send_shutdown(tx: &Slot, poll: PollConfig, ack_timeout: Duration) {
    let deadline = Instant::now() + ack_timeout;
    let never = AtomicBool::new(false);

    // Let the peer finish with the last command first.
    if wait_until(|| tx.is_idle(), poll, deadline, &never).await.is_err() {
        tracing::warn!(state = ?tx.state(), "Peer still holds the last command, sending shutdown anyway");
    }
    tx.store_signal(signal::SHUTDOWN);

    match wait_until(|| tx.raw_signal() != signal::SHUTDOWN, poll, deadline, &never).await {
        Ok(()) => tracing::debug!("Peer acknowledged shutdown"),
        Err(e) => tracing::warn!(error = %e, "Peer did not acknowledge shutdown"),
    }
}

async fn receive_loop(
    rx: Arc<Slot>,
    mut handler: MessageHandler,
    poll: PollConfig,
    closing: Arc<AtomicBool>,
    closed: watch::Sender<bool>,
) {
    let mut schedule = PollSchedule::new(poll);

    while !closing.load(Ordering::Acquire) {
        let activity = match rx.take() {
            Incoming::Empty => false,
            Incoming::Message(message) => {
                deliver(&mut handler, message);
                rx.release();
                true
            }
            Incoming::InvalidLength(len) => {
                tracing::warn!(len, capacity = rx.capacity(), "Discarding message with invalid length");
                rx.release();
                true
            }
            Incoming::PeerError => {
                tracing::warn!("Peer reported an error");
                rx.release();
                true
            }
            Incoming::Unknown(code) => {
                tracing::warn!(code, "Unknown signal, clearing");
                rx.release();
                false
            }
            Incoming::Shutdown => {
                tracing::debug!("Shutdown received");
                closing.store(true, Ordering::Release);
                rx.release();
                break;
            }
        };

        let interval = schedule.next_interval(activity);
        if activity {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }
    }

    let _ = closed.send(true);
}

fn deliver(handler: &mut MessageHandler, message: Bytes) {
    let len = message.len();
    if panic::catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
        tracing::error!(len, "Message handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{tags, FnSink, HybridData, PacketGroup};
    use crate::transport::paired;
    use std::sync::atomic::AtomicUsize;

    fn fast_poll() -> PollConfig {
        PollConfig {
            busy_interval: Duration::from_micros(100),
            idle_interval: Duration::from_millis(1),
            busy_polls: 16,
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[test]
    fn test_builder_default() {
        let builder = ChannelBuilder::new();
        assert!(builder.handler.is_none());
        assert!(builder.on_drained.is_none());
        assert_eq!(builder.config, ChannelConfig::default());
    }

    #[test]
    fn test_builder_setters() {
        let builder = ChannelBuilder::new()
            .send_timeout(Duration::from_millis(10))
            .queue_send_timeout(Duration::from_millis(20))
            .max_pending(8)
            .backpressure_timeout(Duration::from_millis(30))
            .shutdown_ack_timeout(Duration::from_millis(40))
            .poll_config(fast_poll());

        assert_eq!(builder.config.send_timeout, Duration::from_millis(10));
        assert_eq!(builder.config.queue_send_timeout, Duration::from_millis(20));
        assert_eq!(builder.config.max_pending, 8);
        assert_eq!(builder.config.backpressure_timeout, Duration::from_millis(30));
        assert_eq!(builder.config.shutdown_ack_timeout, Duration::from_millis(40));
        assert_eq!(builder.config.poll, fast_poll());
    }

    #[test]
    fn test_config_from_json() {
        let config = ChannelConfig::from_json_str(
            r#"{"send_timeout_ms": 250, "max_pending": 16, "poll": {"idle_interval_us": 2000}}"#,
        )
        .unwrap();
        assert_eq!(config.send_timeout, Duration::from_millis(250));
        assert_eq!(config.max_pending, 16);
        assert_eq!(config.poll.idle_interval, Duration::from_millis(2));
        assert_eq!(config.poll.busy_interval, crate::transport::DEFAULT_BUSY_INTERVAL);
        assert_eq!(config.shutdown_ack_timeout, DEFAULT_SHUTDOWN_ACK_TIMEOUT);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_queue() {
        let (a, _b) = paired(64, 64).unwrap();
        let result = Channel::builder().max_pending(0).start(a).await;
        assert!(matches!(result, Err(GroupwireError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_send_and_receive_both_directions() {
        let (a, b) = paired(256, 256).unwrap();
        let from_a = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let from_b = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let left = {
            let seen = from_b.clone();
            Channel::builder()
                .poll_config(fast_poll())
                .on_message(move |m| seen.lock().push(m))
                .start(a)
                .await
                .unwrap()
        };
        let right = {
            let seen = from_a.clone();
            Channel::builder()
                .poll_config(fast_poll())
                .on_message(move |m| seen.lock().push(m))
                .start(b)
                .await
                .unwrap()
        };

        left.send(&b"to right"[..]).await.unwrap();
        right.send(&b"to left"[..]).await.unwrap();
        wait_for(|| from_a.lock().len() == 1 && from_b.lock().len() == 1).await;

        assert_eq!(&from_a.lock()[0][..], b"to right");
        assert_eq!(&from_b.lock()[0][..], b"to left");

        left.shutdown().await.unwrap();
        right.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_loop() {
        let (a, b) = paired(64, 64).unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        let _receiver = {
            let delivered = delivered.clone();
            Channel::builder()
                .poll_config(fast_poll())
                .on_message(move |m| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    if &m[..] == b"boom" {
                        panic!("handler failure");
                    }
                })
                .start(b)
                .await
                .unwrap()
        };
        let sender = Channel::builder().poll_config(fast_poll()).start(a).await.unwrap();

        sender.send(&b"boom"[..]).await.unwrap();
        sender.send(&b"after"[..]).await.unwrap();
        wait_for(|| delivered.load(Ordering::SeqCst) == 2).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_packets_reassembled_on_receiver() {
        let (a, b) = paired(1024, 64).unwrap();
        let groups: Arc<parking_lot::Mutex<Vec<(u32, PacketGroup)>>> = Arc::default();

        let _receiver = {
            let groups = groups.clone();
            let sink = FnSink::new(
                |_packet: &Packet| Ok(()),
                move |group_id, group| {
                    groups.lock().push((group_id, group));
                    Ok(())
                },
            );
            Channel::builder()
                .poll_config(fast_poll())
                .on_packets(sink)
                .start(b)
                .await
                .unwrap()
        };
        let sender = Channel::builder().poll_config(fast_poll()).start(a).await.unwrap();

        sender
            .send_packets(vec![
                Packet::new(tags::TEXT, 11, 301, HybridData::from_metadata("{\"step\":1}")),
                Packet::new(tags::TEXT, 11, 301, HybridData::from_binary(&b"Done"[..])),
            ])
            .await
            .unwrap();
        wait_for(|| groups.lock().len() == 1).await;

        let groups = groups.lock();
        let (group_id, group) = &groups[0];
        assert_eq!(*group_id, 301);
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].metadata(), "{\"step\":1}");
        assert_eq!(&group[1].binary()[..], b"Done");
        assert!(group[1].end_of_group);
    }

    #[tokio::test]
    async fn test_enqueue_drains_and_notifies() {
        let (a, b) = paired(64, 64).unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(AtomicUsize::new(0));

        let _receiver = {
            let received = received.clone();
            Channel::builder()
                .poll_config(fast_poll())
                .on_message(move |_| {
                    received.fetch_add(1, Ordering::SeqCst);
                })
                .start(b)
                .await
                .unwrap()
        };
        let sender = {
            let drained = drained.clone();
            Channel::builder()
                .poll_config(fast_poll())
                .on_drained(move || {
                    drained.fetch_add(1, Ordering::SeqCst);
                })
                .start(a)
                .await
                .unwrap()
        };

        sender.enqueue(&b"one"[..]).await.unwrap();
        wait_for(|| drained.load(Ordering::SeqCst) == 1).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(sender.pending(), 0);
    }

    #[tokio::test]
    async fn test_send_after_shutdown_started_fails() {
        let (a, _b) = paired(64, 64).unwrap();
        let channel = Channel::builder().poll_config(fast_poll()).start(a).await.unwrap();
        channel.closing.store(true, Ordering::Release);

        let result = channel.send(&b"late"[..]).await;
        assert!(matches!(result, Err(GroupwireError::ShuttingDown)));
        let result = channel.enqueue(&b"late"[..]).await;
        assert!(matches!(result, Err(GroupwireError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_paired_cannot_report_error() {
        let (a, _b) = paired(64, 64).unwrap();
        let channel = Channel::builder().start(a).await.unwrap();
        assert!(matches!(
            channel.report_error().await,
            Err(GroupwireError::InvalidConfig(_))
        ));
    }
}
