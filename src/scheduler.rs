//! Break scheduler state machine
//!
//! The core runs as a single tokio task that owns the configuration, the
//! session counters, the interval timer and the in-flight break. Hosts talk
//! to it through a cloneable [`BreakCoreHandle`]; timer ticks and sequencer
//! reports arrive on their own channels and are processed one at a time, so
//! no session field is ever mutated from two places.

use crate::callbacks::BreakCallbacks;
use crate::config::BreakConfig;
use crate::fullscreen::FullScreenGate;
use crate::sequencer::{BreakOccurrence, BreakOutcome, BreakSequencer, SequencerEvent};
use crate::session::{BreakKind, SessionState};
use crate::timer::IntervalTimer;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};

/// How long shutdown waits for an in-flight break to close its screen
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle state reported by [`BreakCoreHandle::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreState {
    /// Breaks are disabled
    Stopped,
    /// Timer scheduled, no break running
    Active,
    /// Timer suspended while a break sequence runs
    BreakPending,
}

/// Lifetime break statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakStats {
    pub breaks_started: u64,
    pub breaks_completed: u64,
    pub breaks_skipped: u64,
    pub breaks_cancelled: u64,
    pub breaks_aborted: u64,
    /// Ticks that found a full-screen application
    pub suppressed_ticks: u64,
}

/// Snapshot of the core
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub state: CoreState,
    pub active: bool,
    pub initialized: bool,
    pub break_count: u32,
    pub short_break_message_index: usize,
    pub long_break_message_index: usize,
    pub timer_scheduled: bool,
    pub next_break_check: Option<DateTime<Utc>>,
    pub current_break: Option<BreakKind>,
    pub countdown_running: bool,
    pub stats: BreakStats,
}

#[derive(Debug)]
enum Operation {
    Initialize(Box<BreakConfig>),
    Start,
    Stop,
    Restart,
    ToggleActive,
    SkipBreak,
    Status,
    Shutdown,
}

struct Command {
    operation: Operation,
    reply: oneshot::Sender<Result<CoreStatus>>,
}

/// Cloneable handle used by the host to drive the core
#[derive(Debug, Clone)]
pub struct BreakCoreHandle {
    commands: mpsc::Sender<Command>,
}

impl BreakCoreHandle {
    async fn request(&self, operation: Operation) -> Result<CoreStatus> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { operation, reply })
            .await
            .map_err(|_| anyhow!("Break core is not running"))?;
        response
            .await
            .map_err(|_| anyhow!("Break core stopped before answering"))?
    }

    /// Validate and install a configuration; takes full effect on `restart`
    pub async fn initialize(&self, config: BreakConfig) -> Result<CoreStatus> {
        self.request(Operation::Initialize(Box::new(config))).await
    }

    /// Enable breaks and schedule the first tick
    pub async fn start(&self) -> Result<CoreStatus> {
        self.request(Operation::Start).await
    }

    /// Disable breaks, drop the timer and abort any running break
    pub async fn stop(&self) -> Result<CoreStatus> {
        self.request(Operation::Stop).await
    }

    /// Stop and start again if active, picking up a new configuration
    pub async fn restart(&self) -> Result<CoreStatus> {
        self.request(Operation::Restart).await
    }

    /// Pause or resume breaks
    pub async fn toggle_active_state(&self) -> Result<CoreStatus> {
        self.request(Operation::ToggleActive).await
    }

    /// End the running countdown early
    pub async fn skip_break(&self) -> Result<CoreStatus> {
        self.request(Operation::SkipBreak).await
    }

    pub async fn status(&self) -> Result<CoreStatus> {
        self.request(Operation::Status).await
    }

    /// Stop the core and end its task
    pub async fn shutdown(&self) -> Result<CoreStatus> {
        self.request(Operation::Shutdown).await
    }
}

struct InFlightBreak {
    id: u64,
    kind: BreakKind,
    cancel: watch::Sender<bool>,
    countdown_running: bool,
    handle: JoinHandle<()>,
}

/// Break scheduling state machine
pub struct BreakCore {
    callbacks: Arc<dyn BreakCallbacks>,
    gate: Arc<dyn FullScreenGate>,
    config: Option<BreakConfig>,
    session: SessionState,
    timer: Option<IntervalTimer>,
    in_flight: Option<InFlightBreak>,
    next_occurrence_id: u64,
    stats: BreakStats,
    commands: mpsc::Receiver<Command>,
    tick_tx: mpsc::UnboundedSender<u64>,
    ticks: mpsc::UnboundedReceiver<u64>,
    sequencer_tx: mpsc::UnboundedSender<SequencerEvent>,
    sequencer_events: mpsc::UnboundedReceiver<SequencerEvent>,
}

impl BreakCore {
    /// Spawn the core task and return a handle to it
    ///
    /// Must be called from within a tokio runtime. The core starts in the
    /// `Stopped` state and needs `initialize` before `start`.
    pub fn spawn(
        callbacks: Arc<dyn BreakCallbacks>,
        gate: Arc<dyn FullScreenGate>,
    ) -> BreakCoreHandle {
        let (command_tx, commands) = mpsc::channel(32);
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let (sequencer_tx, sequencer_events) = mpsc::unbounded_channel();

        let core = Self {
            callbacks,
            gate,
            config: None,
            session: SessionState::new(),
            timer: None,
            in_flight: None,
            next_occurrence_id: 1,
            stats: BreakStats::default(),
            commands,
            tick_tx,
            ticks,
            sequencer_tx,
            sequencer_events,
        };
        tokio::spawn(core.run());

        BreakCoreHandle {
            commands: command_tx,
        }
    }

    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("Break core task started");

        loop {
            // Sequencer reports first: a host that saw a break end must see
            // the core state that follows it.
            tokio::select! {
                biased;

                Some(event) = self.sequencer_events.recv() => {
                    self.handle_sequencer_event(event);
                }
                Some(job_id) = self.ticks.recv() => {
                    self.scheduler_job(job_id).await;
                }
                command = self.commands.recv() => {
                    let Some(Command { operation, reply }) = command else {
                        debug!("All core handles dropped");
                        break;
                    };
                    let shutdown = matches!(operation, Operation::Shutdown);
                    let result = self.handle_operation(operation).await;
                    let _ = reply.send(result);
                    if shutdown {
                        break;
                    }
                }
            }
        }

        self.stop();
        debug!("Break core task finished");
    }

    async fn handle_operation(&mut self, operation: Operation) -> Result<CoreStatus> {
        match operation {
            Operation::Initialize(config) => self.initialize(*config)?,
            Operation::Start => self.start()?,
            Operation::Stop => self.stop(),
            Operation::Restart => self.restart()?,
            Operation::ToggleActive => self.toggle_active_state()?,
            Operation::SkipBreak => self.skip_break(),
            Operation::Status => {}
            Operation::Shutdown => self.shutdown().await,
        }
        Ok(self.status())
    }

    fn initialize(&mut self, config: BreakConfig) -> Result<()> {
        config.validate()?;
        self.session.rebase(&config);
        info!(
            "Break schedule: every {} min, {} short break(s) per long break",
            config.break_interval, config.no_of_short_breaks_per_long_break
        );
        self.config = Some(config);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("Break core must be initialized before it is started"))?;

        if self.session.active {
            debug!("Break core already active");
            return Ok(());
        }

        self.session.active = true;
        if self.timer.is_none() {
            self.timer = Some(IntervalTimer::new(
                config.break_interval(),
                self.tick_tx.clone(),
            ));
        }

        if self.in_flight.is_some() {
            debug!("Previous break still closing, timer resumes when it finishes");
        } else {
            self.schedule_job();
        }
        info!("Breaks enabled");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.session.active && self.timer.is_none() && self.in_flight.is_none() {
            return;
        }

        self.session.active = false;
        if let Some(timer) = self.timer.take() {
            timer.shutdown();
        }
        self.cancel_in_flight();
        info!("Breaks stopped");
    }

    /// Deactivate without dropping the timer
    fn deactivate(&mut self) {
        self.session.active = false;
        if let Some(timer) = self.timer.as_mut() {
            timer.unschedule();
        }
        self.cancel_in_flight();
        info!("Breaks paused");
    }

    fn restart(&mut self) -> Result<()> {
        if !self.session.active {
            debug!("Restart ignored, breaks are not active");
            return Ok(());
        }
        self.stop();
        self.start()
    }

    fn toggle_active_state(&mut self) -> Result<()> {
        if self.session.active {
            self.deactivate();
            Ok(())
        } else {
            self.start()
        }
    }

    fn skip_break(&mut self) {
        match &self.in_flight {
            Some(in_flight) if in_flight.countdown_running => {
                info!("Skipping break {}", in_flight.id);
                self.session.request_skip();
            }
            _ => debug!("Skip ignored, no break countdown running"),
        }
    }

    async fn shutdown(&mut self) {
        self.stop();
        if let Some(in_flight) = self.in_flight.take() {
            // Give the sequencer a chance to close the break screen
            if timeout(SHUTDOWN_GRACE, in_flight.handle).await.is_err() {
                warn!("Break {} did not finish before shutdown", in_flight.id);
            }
        }
    }

    fn cancel_in_flight(&mut self) {
        if let Some(in_flight) = &self.in_flight {
            debug!("Cancelling break {}", in_flight.id);
            let _ = in_flight.cancel.send(true);
        }
    }

    /// Schedule the next tick using the interval of the current configuration
    fn schedule_job(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            if let Some(config) = &self.config {
                timer.set_period(config.break_interval());
            }
            let job_id = timer.schedule();
            debug!(
                "Next break check (job {}) in {:?}",
                job_id,
                timer.period()
            );
        }
    }

    /// Timer tick: suspend the timer and run the gate-checked tick
    async fn scheduler_job(&mut self, job_id: u64) {
        if !self.session.active {
            return;
        }

        match self.timer.as_mut() {
            Some(timer) if timer.current_job() == Some(job_id) => {
                timer.unschedule();
            }
            _ => {
                debug!("Ignoring tick from stale job {}", job_id);
                return;
            }
        }

        self.process_job().await;
    }

    /// Consult the full-screen gate and launch a break if clear
    async fn process_job(&mut self) {
        let Some(config) = self.config.clone() else {
            return;
        };

        if self.gate.is_full_screen_app_found().await {
            info!("Full-screen application active, postponing break");
            self.stats.suppressed_ticks += 1;
            self.schedule_job();
            return;
        }

        let kind = self
            .session
            .advance_break(config.no_of_short_breaks_per_long_break);
        self.launch_sequencer(kind, &config);
    }

    fn launch_sequencer(&mut self, kind: BreakKind, config: &BreakConfig) {
        let id = self.next_occurrence_id;
        self.next_occurrence_id += 1;

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = BreakSequencer::new(
            id,
            Arc::clone(&self.callbacks),
            config.pre_break_warning(),
            cancel_rx,
            self.session.skip_flag(),
            self.sequencer_tx.clone(),
        )
        .spawn();

        info!("Break {} due ({} break)", id, kind);
        self.in_flight = Some(InFlightBreak {
            id,
            kind,
            cancel,
            countdown_running: false,
            handle,
        });
    }

    fn handle_sequencer_event(&mut self, event: SequencerEvent) {
        match event {
            SequencerEvent::BreakDue {
                occurrence_id,
                reply,
            } => {
                let occurrence = self.occurrence_for(occurrence_id);
                if occurrence.is_some() {
                    self.stats.breaks_started += 1;
                }
                let _ = reply.send(occurrence);
            }
            SequencerEvent::Finished {
                occurrence_id,
                outcome,
            } => self.finish_break(occurrence_id, outcome),
        }
    }

    /// Pick the message for the break that is about to be shown
    fn occurrence_for(&mut self, occurrence_id: u64) -> Option<BreakOccurrence> {
        let config = self.config.as_ref()?;
        let in_flight = self.in_flight.as_mut()?;
        if in_flight.id != occurrence_id || !self.session.active || *in_flight.cancel.borrow() {
            return None;
        }

        in_flight.countdown_running = true;
        let message = self.session.next_message(in_flight.kind, config);
        Some(BreakOccurrence {
            kind: in_flight.kind,
            message,
            duration_secs: config.duration_for(in_flight.kind),
        })
    }

    fn finish_break(&mut self, occurrence_id: u64, outcome: BreakOutcome) {
        match &self.in_flight {
            Some(in_flight) if in_flight.id == occurrence_id => {}
            _ => {
                debug!("Ignoring report from finished break {}", occurrence_id);
                return;
            }
        }
        self.in_flight = None;

        match outcome {
            BreakOutcome::Completed => self.stats.breaks_completed += 1,
            BreakOutcome::Skipped => self.stats.breaks_skipped += 1,
            BreakOutcome::Cancelled => self.stats.breaks_cancelled += 1,
            BreakOutcome::Aborted => self.stats.breaks_aborted += 1,
        }
        info!("Break {} ended: {:?}", occurrence_id, outcome);

        if self.session.active {
            self.schedule_job();
        }
        self.session.reset_skip();
    }

    fn state(&self) -> CoreState {
        if !self.session.active {
            CoreState::Stopped
        } else if self.in_flight.is_some() {
            CoreState::BreakPending
        } else {
            CoreState::Active
        }
    }

    fn status(&self) -> CoreStatus {
        CoreStatus {
            state: self.state(),
            active: self.session.active,
            initialized: self.config.is_some(),
            break_count: self.session.break_count,
            short_break_message_index: self.session.short_break_message_index,
            long_break_message_index: self.session.long_break_message_index,
            timer_scheduled: self.timer.as_ref().is_some_and(|t| t.is_scheduled()),
            next_break_check: self.timer.as_ref().and_then(|t| t.next_fire_at()),
            current_break: self.in_flight.as_ref().map(|b| b.kind),
            countdown_running: self
                .in_flight
                .as_ref()
                .is_some_and(|b| b.countdown_running),
            stats: self.stats.clone(),
        }
    }
}
