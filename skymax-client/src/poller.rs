//! Background poll loop.
//!
//! One task owns the device. Each cycle walks the configured query kinds in
//! order, opening a fresh session per query, and writes successful replies
//! into the shared [`StatusCache`]. Failed queries leave the cache untouched.

use crate::config::PollConfig;
use crate::error::{ClientError, ErrorKind};
use crate::exchange::{exchange, FramingOptions};
use crate::transport::Connector;
use skymax_core::{QueryKind, StatusCache};
use skymax_protocol::{Command, Reply};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// What the poller is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Querying(QueryKind),
    /// Running a one-shot raw command.
    Executing,
    Sleeping,
}

/// Result of one pass over the configured query kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Kinds whose reply was stored.
    pub satisfied: Vec<QueryKind>,
    /// Kinds not queried because their last value is still unconsumed.
    pub skipped: Vec<QueryKind>,
    /// Kinds whose query was abandoned.
    pub failed: Vec<(QueryKind, ErrorKind)>,
    /// The device could not be opened; the rest of the cycle was skipped.
    pub device_unavailable: bool,
}

/// Why [`Poller::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Shutdown,
    /// Single-pass mode saw every configured kind succeed.
    Completed,
}

/// Keeps a [`StatusCache`] current by polling the device.
pub struct Poller<C: Connector> {
    connector: C,
    config: PollConfig,
    framing: FramingOptions,
    cache: Arc<StatusCache>,
    state: parking_lot::Mutex<PollState>,
    /// Raw commands currently running alongside the loop.
    raw_in_flight: AtomicUsize,
    /// Held for the whole open/exchange/close of one query.
    session: tokio::sync::Mutex<()>,
    shutdown: AtomicBool,
    notify: Notify,
}

impl<C: Connector> Poller<C> {
    /// Creates a poller with an empty cache.
    pub fn new(connector: C, config: PollConfig, framing: FramingOptions) -> Self {
        Self::with_cache(connector, config, framing, Arc::new(StatusCache::new()))
    }

    /// Creates a poller writing into an existing cache.
    pub fn with_cache(
        connector: C,
        config: PollConfig,
        framing: FramingOptions,
        cache: Arc<StatusCache>,
    ) -> Self {
        Self {
            connector,
            config,
            framing,
            cache,
            state: parking_lot::Mutex::new(PollState::Idle),
            raw_in_flight: AtomicUsize::new(0),
            session: tokio::sync::Mutex::new(()),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    /// Reports [`PollState::Executing`] while a raw command runs, otherwise
    /// the state of the poll loop.
    pub fn state(&self) -> PollState {
        if self.raw_in_flight.load(Ordering::SeqCst) > 0 {
            return PollState::Executing;
        }
        *self.state.lock()
    }

    fn set_state(&self, state: PollState) {
        *self.state.lock() = state;
    }

    /// Runs one command/reply exchange on a fresh session.
    ///
    /// The session is closed before this returns, whatever the outcome.
    async fn query(&self, command: &Command, kind: Option<QueryKind>) -> Result<Reply, ClientError> {
        let boundary = self.framing.boundary_for(kind);
        let result = {
            let _session = self.session.lock().await;
            match self.connector.connect().await {
                Ok(mut stream) => exchange(&mut stream, command, boundary, &self.framing).await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = &result {
            self.log_abandoned(command, kind, e);
        }
        result
    }

    /// Queries one polled kind. A NAK reply counts as a failure.
    async fn query_kind(&self, kind: QueryKind) -> Result<String, ClientError> {
        let command = Command::new(kind.command())?;
        let reply = self.query(&command, Some(kind)).await?;
        if reply.is_nak() {
            let err = ClientError::Rejected {
                command: command.to_string(),
            };
            self.log_abandoned(&command, Some(kind), &err);
            return Err(err);
        }
        Ok(reply.payload)
    }

    fn log_abandoned(&self, command: &Command, kind: Option<QueryKind>, error: &ClientError) {
        let partial = error.partial_buffer().map(hex::encode).unwrap_or_default();
        tracing::warn!(
            command = %command,
            kind = ?kind,
            error_kind = %error.kind(),
            partial = %partial,
            "Query abandoned: {}",
            error
        );
    }

    /// Runs one pass over the configured query kinds.
    ///
    /// With `gate_on_consumer` set, a kind whose last value has not been
    /// consumed yet is skipped. An unavailable device ends the pass early.
    pub async fn poll_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for &kind in &self.config.queries {
            if self.is_shutdown() {
                break;
            }
            if self.config.gate_on_consumer && self.cache.is_changed(kind) {
                report.skipped.push(kind);
                continue;
            }

            self.set_state(PollState::Querying(kind));
            match self.query_kind(kind).await {
                Ok(payload) => {
                    self.cache.update(kind, payload);
                    report.satisfied.push(kind);
                }
                Err(e) => {
                    report.failed.push((kind, e.kind()));
                    if e.kind() == ErrorKind::DeviceUnavailable {
                        report.device_unavailable = true;
                        break;
                    }
                }
            }
        }

        self.set_state(PollState::Idle);
        tracing::debug!(
            satisfied = report.satisfied.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Poll cycle finished"
        );
        report
    }

    /// Polls until shut down.
    ///
    /// In single-pass mode this returns [`RunOutcome::Completed`] once every
    /// configured kind has been stored at least once.
    pub async fn run(&self) -> RunOutcome {
        tracing::info!(
            queries = ?self.config.queries,
            interval = ?self.config.interval(),
            run_once = self.config.run_once,
            "Poller started"
        );

        let mut seen: Vec<QueryKind> = Vec::new();
        loop {
            if self.is_shutdown() {
                break;
            }

            let report = self.poll_cycle().await;
            for kind in report.satisfied.iter().chain(&report.skipped) {
                if !seen.contains(kind) {
                    seen.push(*kind);
                }
            }

            if self.config.run_once && self.config.queries.iter().all(|k| seen.contains(k)) {
                tracing::info!("All queries answered, poller finished");
                return RunOutcome::Completed;
            }

            let pause = if report.device_unavailable {
                self.config.open_backoff()
            } else {
                self.config.interval()
            };
            if !self.pause(pause).await {
                break;
            }
        }

        tracing::info!("Poller stopped");
        RunOutcome::Shutdown
    }

    /// Sleeps for `duration` unless woken by shutdown. Returns whether to
    /// keep running.
    async fn pause(&self, duration: Duration) -> bool {
        self.set_state(PollState::Sleeping);
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(duration) => {}
        }
        self.set_state(PollState::Idle);
        !self.is_shutdown()
    }

    /// Starts [`run`](Self::run) on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<RunOutcome>
    where
        C: 'static,
    {
        tokio::spawn(async move { self.run().await })
    }

    /// Sends one arbitrary command and returns its reply payload.
    ///
    /// The payload is also stored in the `GeneralStatus` slot. A NAK is
    /// returned as the text `NAK`. An unavailable device is reported to the
    /// caller without retrying.
    pub async fn execute_raw(&self, raw: &str) -> Result<String, ClientError> {
        if self.is_shutdown() {
            return Err(ClientError::ShuttingDown);
        }
        let command = Command::new(raw)?;
        let kind = QueryKind::from_command(command.as_str());

        self.raw_in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.query(&command, kind).await;
        self.raw_in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = result?;
        tracing::debug!(command = %command, payload = %reply.payload, "Raw command answered");
        self.cache
            .update(QueryKind::GeneralStatus, reply.payload.as_str());
        Ok(reply.payload)
    }

    /// Stops the poll loop at its next check point.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
