//! Break sequencer
//!
//! Runs one break occurrence on its own task: notification, pre-break wait,
//! break screen, per-second countdown, end. The core cancels a sequence by
//! flipping its watch channel and skips the countdown through the shared
//! skip flag. The sequencer never touches session state directly; it asks
//! the core for the break details and reports how the sequence ended.

use crate::callbacks::BreakCallbacks;
use crate::session::BreakKind;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Details of the break being shown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakOccurrence {
    pub kind: BreakKind,
    pub message: String,
    pub duration_secs: u64,
}

/// How a sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakOutcome {
    /// Countdown reached zero
    Completed,
    /// User skipped during the countdown
    Skipped,
    /// Deactivated during the countdown
    Cancelled,
    /// Deactivated before the break screen was shown
    Aborted,
}

/// Messages from a sequencer task to the core
#[derive(Debug)]
pub enum SequencerEvent {
    /// Pre-break wait is over; the core replies with the break to show, or
    /// `None` when breaks were deactivated in the meantime
    BreakDue {
        occurrence_id: u64,
        reply: oneshot::Sender<Option<BreakOccurrence>>,
    },
    Finished {
        occurrence_id: u64,
        outcome: BreakOutcome,
    },
}

/// Format remaining seconds as `MM:SS`
pub fn format_countdown(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// One break occurrence, consumed by [`BreakSequencer::spawn`]
pub struct BreakSequencer {
    occurrence_id: u64,
    callbacks: Arc<dyn BreakCallbacks>,
    pre_break_warning: Duration,
    cancel: watch::Receiver<bool>,
    skipped: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SequencerEvent>,
}

impl BreakSequencer {
    pub fn new(
        occurrence_id: u64,
        callbacks: Arc<dyn BreakCallbacks>,
        pre_break_warning: Duration,
        cancel: watch::Receiver<bool>,
        skipped: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<SequencerEvent>,
    ) -> Self {
        Self {
            occurrence_id,
            callbacks,
            pre_break_warning,
            cancel,
            skipped,
            events,
        }
    }

    /// Run the sequence on a fresh task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let outcome = self.sequence().await;
        debug!("Break {} finished: {:?}", self.occurrence_id, outcome);
        let _ = self.events.send(SequencerEvent::Finished {
            occurrence_id: self.occurrence_id,
            outcome,
        });
    }

    async fn sequence(&mut self) -> BreakOutcome {
        self.callbacks.show_notification();

        if self.wait_pre_break().await {
            return BreakOutcome::Aborted;
        }

        let Some(occurrence) = self.request_break().await else {
            return BreakOutcome::Aborted;
        };

        debug!(
            "Break {} starting: {} break for {}s",
            self.occurrence_id, occurrence.kind, occurrence.duration_secs
        );
        self.callbacks.start_break(&occurrence.message);

        let outcome = self.countdown(occurrence.duration_secs).await;

        // A skipped break is closed by whoever requested the skip
        if outcome != BreakOutcome::Skipped {
            self.callbacks.end_break();
        }
        outcome
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn is_skipped(&self) -> bool {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns true if the sequence was cancelled during the wait
    async fn wait_pre_break(&mut self) -> bool {
        if self.is_cancelled() {
            return true;
        }

        let warning = self.pre_break_warning;
        let cancel = &mut self.cancel;
        let woken = tokio::select! {
            _ = sleep(warning) => false,
            // Also resolves when the core drops the sender
            _ = async {
                let _ = cancel.wait_for(|cancelled| *cancelled).await;
            } => true,
        };
        woken || self.is_cancelled()
    }

    async fn request_break(&self) -> Option<BreakOccurrence> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(SequencerEvent::BreakDue {
                occurrence_id: self.occurrence_id,
                reply,
            })
            .ok()?;
        response.await.ok().flatten()
    }

    async fn countdown(&self, seconds: u64) -> BreakOutcome {
        let mut remaining = seconds;
        while remaining > 0 && !self.is_cancelled() && !self.is_skipped() {
            self.callbacks.on_countdown(&format_countdown(remaining));
            sleep(Duration::from_secs(1)).await;
            remaining -= 1;
        }

        if self.is_skipped() {
            BreakOutcome::Skipped
        } else if remaining == 0 {
            BreakOutcome::Completed
        } else {
            BreakOutcome::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Notify,
        Start(String),
        Countdown(String),
        End,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl BreakCallbacks for Recorder {
        fn show_notification(&self) {
            self.calls.lock().unwrap().push(Call::Notify);
        }
        fn start_break(&self, message: &str) {
            self.calls.lock().unwrap().push(Call::Start(message.to_string()));
        }
        fn end_break(&self) {
            self.calls.lock().unwrap().push(Call::End);
        }
        fn on_countdown(&self, formatted_time: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Countdown(formatted_time.to_string()));
        }
    }

    struct Harness {
        recorder: Arc<Recorder>,
        cancel: watch::Sender<bool>,
        skipped: Arc<AtomicBool>,
        events: mpsc::UnboundedReceiver<SequencerEvent>,
    }

    fn spawn_sequencer(warning_secs: u64) -> Harness {
        let recorder = Arc::new(Recorder::default());
        let (cancel, cancel_rx) = watch::channel(false);
        let skipped = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::unbounded_channel();

        BreakSequencer::new(
            7,
            recorder.clone(),
            Duration::from_secs(warning_secs),
            cancel_rx,
            skipped.clone(),
            tx,
        )
        .spawn();

        Harness {
            recorder,
            cancel,
            skipped,
            events,
        }
    }

    fn short_break(duration_secs: u64) -> BreakOccurrence {
        BreakOccurrence {
            kind: BreakKind::Short,
            message: "Blink".to_string(),
            duration_secs,
        }
    }

    async fn answer_break_due(harness: &mut Harness, occurrence: Option<BreakOccurrence>) {
        match harness.events.recv().await {
            Some(SequencerEvent::BreakDue {
                occurrence_id,
                reply,
            }) => {
                assert_eq!(occurrence_id, 7);
                reply.send(occurrence).unwrap();
            }
            other => panic!("expected BreakDue, got {:?}", other),
        }
    }

    async fn finished(harness: &mut Harness) -> BreakOutcome {
        match harness.events.recv().await {
            Some(SequencerEvent::Finished {
                occurrence_id,
                outcome,
            }) => {
                assert_eq!(occurrence_id, 7);
                outcome
            }
            other => panic!("expected Finished, got {:?}", other),
        }
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(0), "00:00");
        assert_eq!(format_countdown(9), "00:09");
        assert_eq!(format_countdown(75), "01:15");
        assert_eq!(format_countdown(3600), "60:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_natural_completion() {
        let mut harness = spawn_sequencer(10);
        let start = Instant::now();

        answer_break_due(&mut harness, Some(short_break(3))).await;
        assert!(start.elapsed() >= Duration::from_secs(10));

        assert_eq!(finished(&mut harness).await, BreakOutcome::Completed);
        assert_eq!(
            harness.recorder.calls(),
            vec![
                Call::Notify,
                Call::Start("Blink".to_string()),
                Call::Countdown("00:03".to_string()),
                Call::Countdown("00:02".to_string()),
                Call::Countdown("00:01".to_string()),
                Call::End,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_length_break_still_closes() {
        let mut harness = spawn_sequencer(0);
        answer_break_due(&mut harness, Some(short_break(0))).await;

        assert_eq!(finished(&mut harness).await, BreakOutcome::Completed);
        assert_eq!(
            harness.recorder.calls(),
            vec![Call::Notify, Call::Start("Blink".to_string()), Call::End]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pre_break_wait() {
        let mut harness = spawn_sequencer(10);
        let start = Instant::now();

        tokio::time::sleep(Duration::from_secs(3)).await;
        harness.cancel.send(true).unwrap();

        assert_eq!(finished(&mut harness).await, BreakOutcome::Aborted);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(harness.recorder.calls(), vec![Call::Notify]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_cancel_sender_aborts_wait() {
        let Harness {
            recorder,
            cancel,
            skipped: _skipped,
            mut events,
        } = spawn_sequencer(10);
        let start = Instant::now();
        drop(cancel);

        match events.recv().await {
            Some(SequencerEvent::Finished { outcome, .. }) => {
                assert_eq!(outcome, BreakOutcome::Aborted)
            }
            other => panic!("expected Finished, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(recorder.calls(), vec![Call::Notify]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_core_declines_break() {
        let mut harness = spawn_sequencer(10);
        answer_break_due(&mut harness, None).await;

        assert_eq!(finished(&mut harness).await, BreakOutcome::Aborted);
        assert_eq!(harness.recorder.calls(), vec![Call::Notify]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_during_countdown() {
        let mut harness = spawn_sequencer(1);
        answer_break_due(&mut harness, Some(short_break(30))).await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        harness.skipped.store(true, Ordering::SeqCst);
        let skipped_at = Instant::now();

        assert_eq!(finished(&mut harness).await, BreakOutcome::Skipped);
        assert!(skipped_at.elapsed() <= Duration::from_secs(1));

        let calls = harness.recorder.calls();
        assert!(!calls.contains(&Call::End));
        let countdowns = calls
            .iter()
            .filter(|c| matches!(c, Call::Countdown(_)))
            .count();
        assert_eq!(countdowns, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_countdown_closes_break() {
        let mut harness = spawn_sequencer(1);
        answer_break_due(&mut harness, Some(short_break(30))).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        harness.cancel.send(true).unwrap();

        assert_eq!(finished(&mut harness).await, BreakOutcome::Cancelled);
        let calls = harness.recorder.calls();
        assert_eq!(calls.last(), Some(&Call::End));
        let countdowns = calls
            .iter()
            .filter(|c| matches!(c, Call::Countdown(_)))
            .count();
        assert_eq!(countdowns, 2);
    }
}
