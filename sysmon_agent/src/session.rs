//! Per-connection broadcast: one timer, bound to one connection's lifetime.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::counters::CounterError;
use crate::snapshot::SnapshotBuilder;
use crate::types::Envelope;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connection is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] CounterError),
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("send failed: {0}")]
    Send(#[from] SinkError),
}

/// Write side of a client connection.
pub trait MessageSink: Send + Sync + 'static {
    /// Whether the connection is open and accepting frames.
    fn is_ready(&self) -> bool;
    fn send_text(&self, text: String) -> impl Future<Output = Result<(), SinkError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closed,
}

struct Shared<S> {
    sink: S,
    builder: Arc<SnapshotBuilder>,
    peer: String,
    closed: AtomicBool,
    // Held around each send and by close(), so nothing is sent once close() returns.
    send_gate: Mutex<()>,
}

pub struct ConnectionSession<S: MessageSink> {
    shared: Arc<Shared<S>>,
    period: Duration,
    state: SessionState,
    ticker: Option<JoinHandle<()>>,
}

impl<S: MessageSink> ConnectionSession<S> {
    pub fn new(
        sink: S,
        builder: Arc<SnapshotBuilder>,
        period: Duration,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                builder,
                peer: peer.into(),
                closed: AtomicBool::new(false),
                send_gate: Mutex::new(()),
            }),
            period,
            state: SessionState::Created,
            ticker: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    /// Starts the periodic broadcast. First tick fires one period from now.
    pub fn start(&mut self) {
        if self.state != SessionState::Created {
            return;
        }
        let shared = self.shared.clone();
        self.ticker = Some(tokio::spawn(run_ticker(shared, self.period)));
        self.state = SessionState::Active;
    }

    /// Cancels the timer and any in-flight snapshot. Idempotent; once this
    /// returns no further message reaches the sink.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        {
            let _gate = self.shared.send_gate.lock().await;
            self.shared.closed.store(true, Ordering::Release);
        }
        self.state = SessionState::Closed;
        warn!(peer = %self.shared.peer, "client disconnected from the monitoring service");
    }
}

impl<S: MessageSink> Drop for ConnectionSession<S> {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            debug!(
                peer = %self.shared.peer,
                "session dropped without close, cancelling its timer"
            );
        }
        self.shared.closed.store(true, Ordering::Release);
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

async fn run_ticker<S: MessageSink>(shared: Arc<Shared<S>>, period: Duration) {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Ticks do not wait for each other: a snapshot slower than the period
    // overlaps with the next one. Dropping the set aborts what is left.
    let mut in_flight = JoinSet::new();
    loop {
        ticks.tick().await;
        while let Some(done) = in_flight.try_join_next() {
            if let Err(e) = done {
                warn!(peer = %shared.peer, "monitoring tick panicked: {e}");
            }
        }
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        if !shared.sink.is_ready() {
            debug!(peer = %shared.peer, "connection not ready, skipping tick");
            continue;
        }
        let shared = shared.clone();
        in_flight.spawn(async move { shared.broadcast().await });
    }
}

impl<S: MessageSink> Shared<S> {
    async fn broadcast(&self) {
        match self.try_broadcast().await {
            Ok(()) => {}
            Err(TickError::Send(SinkError::Closed)) => {
                debug!(peer = %self.peer, "snapshot finished after the connection closed")
            }
            Err(e) => warn!(peer = %self.peer, "monitoring tick failed: {e}"),
        }
    }

    async fn try_broadcast(&self) -> Result<(), TickError> {
        let report = self.builder.build().await?;
        let text = serde_json::to_string(&Envelope::monitoring(report))?;
        let _gate = self.send_gate.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.sink.send_text(text).await?;
        Ok(())
    }
}

/// Logs the new connection and starts its session.
pub fn open_session<S: MessageSink>(
    sink: S,
    builder: Arc<SnapshotBuilder>,
    period: Duration,
    peer: impl Into<String>,
) -> ConnectionSession<S> {
    let mut session = ConnectionSession::new(sink, builder, period, peer);
    info!(
        peer = %session.shared.peer,
        "a new client has connected to the monitoring service"
    );
    session.start();
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::cpu::tests::{core, ScriptedCounters};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        ready: AtomicBool,
        fail_first: AtomicBool,
        sent: StdMutex<Vec<String>>,
    }

    impl RecordingSink {
        fn ready() -> Self {
            let s = Self::default();
            s.ready.store(true, Ordering::SeqCst);
            s
        }
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl MessageSink for RecordingSink {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
        async fn send_text(&self, text: String) -> Result<(), SinkError> {
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(SinkError::Transport("broken pipe".into()));
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        }
    }

    fn builder(cpu: bool, window: Duration) -> Arc<SnapshotBuilder> {
        let mut counters = ScriptedCounters::new(vec![vec![core(1, 1, 1000)]]);
        counters.total_mem = 4 * 1024 * 1024 * 1024;
        counters.free_mem = 1024 * 1024 * 1024;
        let config = Arc::new(Config {
            cpu,
            ram: true,
            cpu_window: window,
            ..Config::default()
        });
        Arc::new(SnapshotBuilder::new(config, Arc::new(counters)))
    }

    async fn wait_for(sink: &RecordingSink, n: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sink.count() < n {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for {n} messages");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn lifecycle_states() {
        let mut s = ConnectionSession::new(
            RecordingSink::ready(),
            builder(false, Duration::ZERO),
            Duration::from_millis(10),
            "test",
        );
        assert_eq!(s.state(), SessionState::Created);
        s.start();
        assert_eq!(s.state(), SessionState::Active);
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);
        // no way back
        s.start();
        assert_eq!(s.state(), SessionState::Closed);
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn pushes_monitoring_envelopes() {
        let mut s = open_session(
            RecordingSink::ready(),
            builder(false, Duration::ZERO),
            Duration::from_millis(10),
            "test",
        );
        wait_for(s.sink(), 2).await;
        s.close().await;
        let first = s.sink().sent.lock().unwrap()[0].clone();
        let env: Envelope = serde_json::from_str(&first).unwrap();
        assert_eq!(env.header, "Monitoring");
        assert_eq!(env.payload.ram.total, "4");
        assert_eq!(env.payload.ram.usage, "75");
        assert_eq!(env.payload.cpu.count, "N/A");
    }

    #[tokio::test]
    async fn not_ready_connection_gets_nothing() {
        let mut s = open_session(
            RecordingSink::default(),
            builder(false, Duration::ZERO),
            Duration::from_millis(10),
            "test",
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(s.sink().count(), 0);
        assert_eq!(s.state(), SessionState::Active);
        s.close().await;
    }

    #[tokio::test]
    async fn nothing_is_sent_after_close() {
        let mut s = open_session(
            RecordingSink::ready(),
            builder(false, Duration::ZERO),
            Duration::from_millis(5),
            "test",
        );
        wait_for(s.sink(), 1).await;
        s.close().await;
        let n = s.sink().count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(s.sink().count(), n);
    }

    #[tokio::test]
    async fn in_flight_snapshot_is_dropped_on_close() {
        // every snapshot outlives the close below
        let mut s = open_session(
            RecordingSink::ready(),
            builder(true, Duration::from_millis(100)),
            Duration::from_millis(10),
            "test",
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        s.close().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(s.sink().count(), 0);
    }

    #[tokio::test]
    async fn failed_tick_does_not_stop_the_session() {
        let sink = RecordingSink::ready();
        sink.fail_first.store(true, Ordering::SeqCst);
        let mut s = open_session(
            sink,
            builder(false, Duration::ZERO),
            Duration::from_millis(10),
            "test",
        );
        wait_for(s.sink(), 2).await;
        s.close().await;
    }

    #[tokio::test]
    async fn counter_failure_sends_nothing_and_keeps_ticking() {
        let mut counters = ScriptedCounters::new(vec![]);
        counters.fail_ticks = true;
        let config = Arc::new(Config {
            cpu: true,
            cpu_window: Duration::ZERO,
            ..Config::default()
        });
        let b = Arc::new(SnapshotBuilder::new(config, Arc::new(counters)));
        let mut s = open_session(RecordingSink::ready(), b, Duration::from_millis(10), "test");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(s.sink().count(), 0);
        assert!(s.ticker.as_ref().is_some_and(|t| !t.is_finished()));
        s.close().await;
    }

    #[tokio::test]
    async fn slow_snapshots_overlap() {
        // 60ms snapshots on a 10ms timer: unserialized ticks keep the
        // message rate near the timer rate once the first one lands.
        let mut s = open_session(
            RecordingSink::ready(),
            builder(true, Duration::from_millis(60)),
            Duration::from_millis(10),
            "test",
        );
        tokio::time::sleep(Duration::from_millis(170)).await;
        let n = s.sink().count();
        s.close().await;
        assert!(n >= 4, "only {n} messages, ticks were serialized");
    }

    #[tokio::test]
    async fn dropping_the_session_cancels_its_timer() {
        let sink = Arc::new(RecordingSink::ready());
        struct Forward(Arc<RecordingSink>);
        impl MessageSink for Forward {
            fn is_ready(&self) -> bool {
                self.0.is_ready()
            }
            async fn send_text(&self, text: String) -> Result<(), SinkError> {
                self.0.send_text(text).await
            }
        }
        let s = open_session(
            Forward(sink.clone()),
            builder(false, Duration::ZERO),
            Duration::from_millis(5),
            "test",
        );
        wait_for(&sink, 1).await;
        drop(s);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n = sink.count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.count(), n);
    }

    #[derive(Clone, Default)]
    struct LogBuf(Arc<StdMutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dropping_an_active_session_logs_the_disconnect() {
        let logs = LogBuf::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let s = open_session(
            RecordingSink::default(),
            builder(false, Duration::ZERO),
            Duration::from_millis(10),
            "dropped-peer",
        );
        tracing::subscriber::with_default(subscriber, || drop(s));

        let out = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("session dropped without close"), "{out}");
        assert!(out.contains("dropped-peer"), "{out}");
    }

    #[tokio::test]
    async fn dropping_a_closed_session_logs_nothing_more() {
        let logs = LogBuf::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut s = open_session(
            RecordingSink::default(),
            builder(false, Duration::ZERO),
            Duration::from_millis(10),
            "test",
        );
        s.close().await;
        tracing::subscriber::with_default(subscriber, || drop(s));

        assert!(logs.0.lock().unwrap().is_empty());
    }
}
