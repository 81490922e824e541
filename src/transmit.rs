// src/transmit.rs
//
// Periodic send controller: a single send, or a recurring timer that asks
// the application to run its send path every interval until stopped.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::composer::{parse_number, ParseError, Radix};
use crate::connection::SendError;

/// Longest timer period; larger intervals are treated as this one
const MAX_PERIOD_MS: u64 = 24 * 60 * 60 * 1000;

/// Delivers a timer tick to the application; returns false once the
/// receiver is gone, which ends the timer task.
pub type TickFn = Arc<dyn Fn(u64) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending { interval_ms: u64 },
}

/// What `trigger` decided to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerAction {
    /// No interval set: send one frame now
    SendOnce,
    /// Recurring sends started
    Started { interval_ms: u64 },
    /// Recurring sends stopped
    Stopped,
}

/// Parse interval text in milliseconds. Empty, zero or negative means no
/// interval (single send).
pub fn parse_interval(text: &str) -> Result<Option<u64>, ParseError> {
    Ok(parse_number(text, Radix::Decimal)?
        .filter(|&ms| ms > 0)
        .map(|ms| ms as u64))
}

/// Active repeat task
struct RepeatTask {
    cancel_flag: Arc<AtomicBool>,
    /// Set while a delivered tick has not been accepted yet
    pending: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SendController {
    interval_ms: Option<u64>,
    state: SendState,
    tick: TickFn,
    /// Incremented on every start; ticks from older timers are ignored
    generation: u64,
    task: Option<RepeatTask>,
}

impl SendController {
    pub fn new(tick: TickFn) -> Self {
        Self {
            interval_ms: None,
            state: SendState::Idle,
            tick,
            generation: 0,
            task: None,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.state, SendState::Sending { .. })
    }

    pub fn interval_ms(&self) -> Option<u64> {
        self.interval_ms
    }

    /// Set the interval from text; takes effect on the next start
    pub fn set_interval(&mut self, text: &str) -> Result<Option<u64>, ParseError> {
        self.interval_ms = parse_interval(text)?;
        Ok(self.interval_ms)
    }

    /// Label of the send button for the current state
    pub fn button_label(&self) -> &'static str {
        match (self.state, self.interval_ms) {
            (SendState::Sending { .. }, _) => "Stop",
            (SendState::Idle, Some(_)) => "Start",
            (SendState::Idle, None) => "Send",
        }
    }

    /// The send button: stop if sending, otherwise send once or start.
    /// Refused when not connected, unless it is stopping.
    pub fn trigger(&mut self, connected: bool) -> Result<TriggerAction, SendError> {
        if self.is_sending() {
            self.stop();
            return Ok(TriggerAction::Stopped);
        }
        if !connected {
            return Err(SendError::NotConnected);
        }
        match self.interval_ms {
            None => Ok(TriggerAction::SendOnce),
            Some(interval_ms) => {
                self.start(interval_ms);
                Ok(TriggerAction::Started { interval_ms })
            }
        }
    }

    /// Start the recurring timer. The first tick arrives one interval later.
    ///
    /// At most one tick is outstanding: while a delivered tick has not been
    /// passed to `accept_tick`, further timer fires are skipped, so a send
    /// slower than the interval never builds a backlog.
    pub fn start(&mut self, interval_ms: u64) {
        self.stop();
        self.generation += 1;

        let generation = self.generation;
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicBool::new(false));
        let cancel = cancel_flag.clone();
        let outstanding = pending.clone();
        let tick = self.tick.clone();
        let period = Duration::from_millis(interval_ms.clamp(1, MAX_PERIOD_MS));

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                if outstanding.swap(true, Ordering::AcqRel) {
                    continue;
                }
                if !tick(generation) {
                    break;
                }
            }
        });

        tlog!("[transmit] Started repeat every {}ms", interval_ms);
        self.task = Some(RepeatTask {
            cancel_flag,
            pending,
            handle,
        });
        self.state = SendState::Sending { interval_ms };
    }

    /// Stop the recurring timer. Returns true if it was running.
    pub fn stop(&mut self) -> bool {
        self.state = SendState::Idle;
        match self.task.take() {
            Some(task) => {
                task.cancel_flag.store(true, Ordering::Relaxed);
                task.handle.abort();
                tlog!("[transmit] Stopped repeat");
                true
            }
            None => false,
        }
    }

    /// Accept a timer tick: true if it belongs to the running timer.
    /// Accepting re-arms the timer for the next tick.
    pub fn accept_tick(&self, generation: u64) -> bool {
        if !self.is_sending() || generation != self.generation {
            return false;
        }
        if let Some(task) = &self.task {
            task.pending.store(false, Ordering::Release);
        }
        true
    }
}

impl Drop for SendController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel_flag.store(true, Ordering::Relaxed);
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn controller() -> (SendController, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tick: TickFn = Arc::new(move |generation| tx.send(generation).is_ok());
        (SendController::new(tick), rx)
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval(""), Ok(None));
        assert_eq!(parse_interval("0"), Ok(None));
        assert_eq!(parse_interval("-10"), Ok(None));
        assert_eq!(parse_interval("100"), Ok(Some(100)));
        assert_eq!(parse_interval("1,000"), Ok(Some(1000)));
        assert!(parse_interval("fast").is_err());
    }

    #[tokio::test]
    async fn test_button_labels() {
        let (mut ctl, _rx) = controller();
        assert_eq!(ctl.button_label(), "Send");
        ctl.set_interval("50").unwrap();
        assert_eq!(ctl.button_label(), "Start");
        ctl.trigger(true).unwrap();
        assert_eq!(ctl.button_label(), "Stop");
        ctl.trigger(true).unwrap();
        assert_eq!(ctl.button_label(), "Start");
    }

    #[tokio::test]
    async fn test_trigger_without_interval_sends_once() {
        let (mut ctl, _rx) = controller();
        assert_eq!(ctl.trigger(true).unwrap(), TriggerAction::SendOnce);
        assert_eq!(ctl.state(), SendState::Idle);
    }

    #[tokio::test]
    async fn test_trigger_refused_when_disconnected() {
        let (mut ctl, _rx) = controller();
        assert!(matches!(ctl.trigger(false), Err(SendError::NotConnected)));
        ctl.set_interval("100").unwrap();
        assert!(matches!(ctl.trigger(false), Err(SendError::NotConnected)));
        assert_eq!(ctl.state(), SendState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_interval() {
        let (mut ctl, mut rx) = controller();
        ctl.set_interval("100").unwrap();

        let started = Instant::now();
        assert_eq!(
            ctl.trigger(true).unwrap(),
            TriggerAction::Started { interval_ms: 100 }
        );

        let generation = rx.recv().await.unwrap();
        assert!(ctl.accept_tick(generation));
        assert_eq!(started.elapsed(), Duration::from_millis(100));

        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_ticks() {
        let (mut ctl, mut rx) = controller();
        ctl.start(10);
        let generation = rx.recv().await.unwrap();

        assert!(ctl.stop());
        assert!(!ctl.accept_tick(generation));
        assert!(!ctl.stop());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unaccepted_tick_holds_back_the_next() {
        let (mut ctl, mut rx) = controller();
        ctl.start(10);

        tokio::time::sleep(Duration::from_millis(105)).await;
        let generation = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());

        assert!(ctl.accept_tick(generation));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(rx.try_recv().unwrap(), generation);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_ignores_stale_ticks() {
        let (mut ctl, mut rx) = controller();
        ctl.start(10);
        let old = rx.recv().await.unwrap();
        ctl.start(20);
        let new = rx.recv().await.unwrap();
        assert!(!ctl.accept_tick(old));
        assert!(ctl.accept_tick(new));
    }
}
