//! Stream supervisor.
//!
//! One task owns the connection lifecycle. Periodic rule refreshes and post
//! dispatches are spawned onto a task tracker so neither blocks the event
//! loop; at most one refresh is in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::FeedResult;
use crate::router::{dispatch, route};
use crate::routing::{RoutingTable, SnapshotSource};
use crate::sink::MessageSink;
use crate::stream::{FeedStream, StreamEvent};
use crate::sync::{synchronize, RuleStore, SyncReport};
use crate::types::PostEvent;

/// Timing knobs for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed wait between failed connection attempts, and before reopening a
    /// stream that closed sooner than this after opening.
    pub reconnect_delay: Duration,
    /// Period of the rule refresh cycle.
    pub refresh_interval: Duration,
    /// How often stream liveness is checked.
    pub keepalive_interval: Duration,
    /// Silence after which an open stream is considered dead.
    pub stall_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(4 * 60 * 60),
            keepalive_interval: Duration::from_secs(5),
            stall_timeout: Duration::from_secs(90),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Streaming,
    ShuttingDown,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

enum Flow {
    Reconnect,
    Shutdown,
}

/// Resolve, publish and sync; cloned into spawned refresh tasks.
#[derive(Clone)]
struct Refresher {
    rules: Arc<dyn RuleStore>,
    source: Arc<dyn SnapshotSource>,
    routes: Arc<RoutingTable>,
}

impl Refresher {
    async fn refresh(&self) -> FeedResult<SyncReport> {
        let snapshot = self.source.resolve().await?;
        info!(
            tracked = snapshot.channels.len(),
            queries = snapshot.queries.len(),
            "Resolved channel map"
        );

        let desired = snapshot.rules();
        self.routes.publish(snapshot.channels);
        let desired = desired?;

        let report = synchronize(self.rules.as_ref(), &desired).await?;
        info!(
            rules = desired.len(),
            kept = report.kept,
            added = report.added,
            deleted = report.deleted,
            "Filter rules synchronized"
        );
        Ok(report)
    }
}

pub struct Supervisor {
    refresher: Refresher,
    stream: Arc<dyn FeedStream>,
    sink: Arc<dyn MessageSink>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    refreshing: Arc<AtomicBool>,
    state_tx: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        stream: Arc<dyn FeedStream>,
        source: Arc<dyn SnapshotSource>,
        sink: Arc<dyn MessageSink>,
        config: SupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            refresher: Refresher {
                rules,
                source,
                routes: Arc::new(RoutingTable::default()),
            },
            stream,
            sink,
            config,
            shutdown,
            tasks: TaskTracker::new(),
            refreshing: Arc::new(AtomicBool::new(false)),
            state_tx,
        }
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    pub fn routes(&self) -> Arc<RoutingTable> {
        self.refresher.routes.clone()
    }

    fn set_state(&self, next: SupervisorState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            debug!(from = prev.as_str(), to = next.as_str(), "Supervisor state change");
        }
    }

    /// Run one refresh cycle: resolve configuration, publish the new
    /// mapping, then converge the remote rules onto it.
    pub async fn refresh(&self) -> FeedResult<SyncReport> {
        self.refresher.refresh().await
    }

    /// Start a refresh on the task tracker unless one is still running.
    fn spawn_refresh(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.refreshing.swap(true, Ordering::AcqRel) {
            warn!("Previous rule refresh still running, skipping this cycle");
            return;
        }

        let refresher = self.refresher.clone();
        let refreshing = self.refreshing.clone();
        self.tasks.spawn(async move {
            // rule changes apply server-side; the connection stays up
            if let Err(e) = refresher.refresh().await {
                error!("Periodic rule refresh failed: {e}");
            }
            refreshing.store(false, Ordering::Release);
        });
    }

    /// Sleep for the reconnect delay. `false` means shutdown arrived first.
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = sleep(self.config.reconnect_delay) => true,
        }
    }

    /// Drive the stream until the shutdown token is cancelled.
    ///
    /// Returns an error only when the initial configuration cannot be
    /// resolved. Every remote failure after that is logged and retried.
    pub async fn run(&self) -> FeedResult<()> {
        info!("Stream supervisor starting");

        if let Err(e) = self.refresh().await {
            if e.is_fatal() {
                self.set_state(SupervisorState::ShuttingDown);
                return Err(e);
            }
            warn!("Initial rule sync failed, streaming with installed rules: {e}");
        }

        let period = self.config.refresh_interval;
        let mut refresh = interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while let Some(events) = self.connect().await {
            let opened_at = Instant::now();
            match self.consume(events, &mut refresh).await {
                Flow::Reconnect => {
                    self.set_state(SupervisorState::Disconnected);
                    let lived = opened_at.elapsed();
                    if lived < self.config.reconnect_delay {
                        warn!(
                            lived_ms = lived.as_millis() as u64,
                            retry_in_secs = self.config.reconnect_delay.as_secs(),
                            "Stream closed right after opening, backing off"
                        );
                        if !self.backoff().await {
                            break;
                        }
                    }
                }
                Flow::Shutdown => break,
            }
        }

        self.set_state(SupervisorState::ShuttingDown);
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "Waiting for in-flight tasks");
        }
        self.tasks.wait().await;
        info!("Stream supervisor stopped");
        Ok(())
    }

    /// Open the stream, retrying at a fixed delay. `None` means shutdown.
    async fn connect(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        let mut attempt: u64 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            self.set_state(SupervisorState::Connecting);
            attempt += 1;

            let opened = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                opened = self.stream.open() => opened,
            };

            match opened {
                Ok(events) => {
                    info!(attempt, "Stream started");
                    self.set_state(SupervisorState::Streaming);
                    return Some(events);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        retry_in_secs = self.config.reconnect_delay.as_secs(),
                        "Failed to start stream: {e}"
                    );
                    if !self.backoff().await {
                        return None;
                    }
                }
            }
        }
    }

    async fn consume(
        &self,
        mut events: mpsc::Receiver<StreamEvent>,
        refresh: &mut Interval,
    ) -> Flow {
        let mut keepalive = interval(self.config.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, closing stream");
                    return Flow::Shutdown;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("Stream closed, reconnecting");
                        return Flow::Reconnect;
                    };
                    last_activity = Instant::now();
                    self.handle_event(event);
                }
                _ = refresh.tick() => self.spawn_refresh(),
                _ = keepalive.tick() => {
                    let idle = last_activity.elapsed();
                    if idle > self.config.stall_timeout {
                        warn!(idle_secs = idle.as_secs(), "Stream stalled, reconnecting");
                        return Flow::Reconnect;
                    }
                }
            }
        }
    }

    fn handle_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Post(post) => self.spawn_dispatch(*post),
            StreamEvent::System(message) => info!(message = %message, "Stream system message"),
            StreamEvent::Error(e) => warn!("{e}"),
            StreamEvent::KeepAlive => debug!("Stream heartbeat"),
        }
    }

    fn spawn_dispatch(&self, event: PostEvent) {
        let channels = self.refresher.routes.load();
        let sink = self.sink.clone();
        self.tasks.spawn(async move {
            let r = route(&event, &channels);
            if r.destinations.is_empty() {
                debug!(post_id = %event.data.id, "No destination for post");
                return;
            }
            let delivered = dispatch(sink.as_ref(), &r).await;
            debug!(
                post_id = %event.data.id,
                delivered,
                destinations = r.destinations.len(),
                "Post dispatched"
            );
        });
    }
}
