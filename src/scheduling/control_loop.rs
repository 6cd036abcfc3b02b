use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// Policy half of a timer/event loop: when to wake up next and what to do about it.
#[async_trait]
pub trait ControlLoop: Send + 'static {
    type Event: Debug + Send + 'static;

    fn name(&self) -> &'static str;

    /// Earliest instant the loop has work to do; `None` leaves it idle until the next event.
    async fn next_wakeup(&mut self) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn on_event(&mut self, event: Self::Event) -> anyhow::Result<()>;

    /// Handles the work due at the wake-up. Must stop starting new work once `token` is cancelled.
    async fn on_fire(&mut self, token: &CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    /// Delay used when the next wake-up is already in the past.
    pub overdue_delay: Duration,
    /// Delay before retrying after the next wake-up could not be computed.
    pub retry_delay: Duration,
}

pub struct LoopTask {
    task_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl LoopTask {
    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }

    pub async fn cancel(self, timeout: Duration) {
        self.cancellation_token.cancel();
        if time::timeout(timeout, self.task_handle).await.is_err() {
            log::warn!("Control loop did not stop in time. [timeout = {:?}]", timeout);
        }
    }
}

pub fn spawn<L: ControlLoop>(
    control: L,
    events: mpsc::Receiver<L::Event>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
    timing: LoopTiming,
) -> LoopTask {
    let task_token = cancellation_token.clone();
    let task_handle = tokio::spawn(async move {
        run(control, events, task_token, clock, timing).await;
    });

    LoopTask {
        task_handle,
        cancellation_token,
    }
}

async fn run<L: ControlLoop>(
    mut control: L,
    mut events: mpsc::Receiver<L::Event>,
    token: CancellationToken,
    clock: Arc<dyn Clock>,
    timing: LoopTiming,
) {
    let name = control.name();
    log::info!("Control loop started. [loop = {}]", name);

    let mut deadline = rearm(&mut control, None, clock.as_ref(), timing).await;

    loop {
        let timer = async move {
            match deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    log::info!("Mailbox closed, stopping control loop. [loop = {}]", name);
                    break;
                };
                log::debug!("Control loop received event. [loop = {}, event = {:?}]", name, event);
                if let Err(error) = control.on_event(event).await {
                    log::error!("Failed to handle event. [loop = {}, error = {:#}]", name, error);
                }
            }
            _ = timer => {
                if let Err(error) = control.on_fire(&token).await {
                    log::error!("Failed to handle wake-up. [loop = {}, error = {:#}]", name, error);
                }
            }
        }

        if token.is_cancelled() {
            break;
        }
        deadline = rearm(&mut control, deadline, clock.as_ref(), timing).await;
    }

    log::info!("Control loop stopped. [loop = {}]", name);
}

/// Recomputes the timer. When storage cannot be read, a still pending timer is kept, otherwise the
/// loop retries after `retry_delay`.
async fn rearm<L: ControlLoop>(
    control: &mut L,
    previous: Option<Instant>,
    clock: &dyn Clock,
    timing: LoopTiming,
) -> Option<Instant> {
    match control.next_wakeup().await {
        Ok(Some(wakeup)) => {
            let deadline = deadline_for(wakeup, clock.now(), previous, timing.overdue_delay);
            log::debug!(
                "Control loop armed. [loop = {}, wakeup = {}]",
                control.name(),
                wakeup
            );
            Some(deadline)
        }
        Ok(None) => {
            log::debug!("Control loop idle. [loop = {}]", control.name());
            None
        }
        Err(error) => {
            log::error!(
                "Failed to compute next wake-up. [loop = {}, error = {:#}]",
                control.name(),
                error
            );
            let now = Instant::now();
            Some(
                previous
                    .filter(|previous| *previous > now)
                    .unwrap_or(now + timing.retry_delay),
            )
        }
    }
}

/// An overdue wake-up fires after `overdue_delay`, or earlier when a still pending timer is due
/// sooner, so a stream of events cannot keep postponing it.
fn deadline_for(
    wakeup: DateTime<Utc>,
    now: DateTime<Utc>,
    previous: Option<Instant>,
    overdue_delay: Duration,
) -> Instant {
    let started = Instant::now();
    match (wakeup - now).to_std() {
        Ok(wait) if !wait.is_zero() => started + wait,
        _ => {
            let delayed = started + overdue_delay;
            previous
                .filter(|previous| *previous > started)
                .map_or(delayed, |previous| previous.min(delayed))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::test_utils::TokioClock;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Wakes at the queued instants in order; an `Err` entry fails the lookup once.
    struct ScriptedLoop {
        clock: Arc<dyn Clock>,
        wakeups: Vec<Result<DateTime<Utc>, &'static str>>,
        log: Log,
    }

    #[async_trait]
    impl ControlLoop for ScriptedLoop {
        type Event = DateTime<Utc>;

        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn next_wakeup(&mut self) -> anyhow::Result<Option<DateTime<Utc>>> {
            match self.wakeups.first().copied() {
                None => Ok(None),
                Some(Ok(wakeup)) => Ok(Some(wakeup)),
                Some(Err(message)) => {
                    self.wakeups.drain(..1);
                    anyhow::bail!(message)
                }
            }
        }

        async fn on_event(&mut self, event: Self::Event) -> anyhow::Result<()> {
            self.wakeups.insert(0, Ok(event));
            Ok(())
        }

        async fn on_fire(&mut self, _token: &CancellationToken) -> anyhow::Result<()> {
            let now = self.clock.now();
            let due = self
                .wakeups
                .iter()
                .take_while(|wakeup| matches!(wakeup, Ok(at) if *at <= now))
                .count();
            self.wakeups.drain(..due);
            self.log.lock().unwrap().push(format!("fired at {}", now.timestamp()));
            Ok(())
        }
    }

    struct Fixture {
        base: DateTime<Utc>,
        log: Log,
        events: mpsc::Sender<DateTime<Utc>>,
        task: LoopTask,
    }

    fn start(offsets: Vec<Result<i64, &'static str>>) -> Fixture {
        let base = Utc.with_ymd_and_hms(2025, 5, 31, 12, 0, 0).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base));
        let log = Log::default();
        let control = ScriptedLoop {
            clock: clock.clone(),
            wakeups: offsets
                .into_iter()
                .map(|offset| offset.map(|secs| base + TimeDelta::seconds(secs)))
                .collect(),
            log: log.clone(),
        };
        let (events, receiver) = mpsc::channel(8);
        let timing = LoopTiming {
            overdue_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
        };
        let task = spawn(control, receiver, CancellationToken::new(), clock, timing);

        Fixture {
            base,
            log,
            events,
            task,
        }
    }

    fn fired(fixture: &Fixture) -> Vec<String> {
        fixture.log.lock().unwrap().clone()
    }

    fn fired_at(fixture: &Fixture, offset: i64) -> String {
        format!("fired at {}", (fixture.base + TimeDelta::seconds(offset)).timestamp())
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_each_wakeup() {
        let fixture = start(vec![Ok(10), Ok(20)]);

        time::sleep(Duration::from_secs(25)).await;

        assert_eq!(fired(&fixture), vec![fired_at(&fixture, 10), fired_at(&fixture, 20)]);
    }

    #[tokio::test(start_paused = true)]
    async fn event_rearms_to_an_earlier_wakeup() {
        let fixture = start(vec![Ok(60)]);

        time::sleep(Duration::from_secs(1)).await;
        fixture
            .events
            .send(fixture.base + TimeDelta::seconds(5))
            .await
            .unwrap();
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired(&fixture), vec![fired_at(&fixture, 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_wakeup_fires_after_the_fixed_delay() {
        let fixture = start(vec![Ok(-3600)]);

        time::sleep(Duration::from_millis(500)).await;
        assert!(fired(&fixture).is_empty());

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired(&fixture), vec![fired_at(&fixture, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn events_do_not_postpone_an_overdue_wakeup() {
        let fixture = start(vec![Ok(-3600)]);

        for _ in 0..5 {
            time::sleep(Duration::from_millis(400)).await;
            fixture
                .events
                .send(fixture.base - TimeDelta::hours(1))
                .await
                .unwrap();
        }
        time::sleep(Duration::from_millis(500)).await;

        // Events at 0.4s and 0.8s keep the 1s timer; the one at 1.2s arms a new one for 2.2s.
        assert_eq!(fired(&fixture), vec![fired_at(&fixture, 1), fired_at(&fixture, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lookup_is_retried() {
        let fixture = start(vec![Err("storage unavailable"), Ok(2)]);

        time::sleep(Duration::from_secs(3)).await;
        assert!(fired(&fixture).is_empty(), "the lookup failure must not arm the 2s timer");

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired(&fixture), vec![fired_at(&fixture, 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_loop() {
        let fixture = start(vec![Ok(10)]);
        let log = fixture.log.clone();

        fixture.task.cancel(Duration::from_secs(1)).await;
        time::sleep(Duration::from_secs(20)).await;

        assert!(log.lock().unwrap().is_empty());
    }
}
