//! What happens when an alarm goes off.
//!
//! A fire walks through
//!
//! ```text
//! Armed -> WakeAcquired -> ServiceSignaled -> Notified -> PlayingAudio
//!       -> VibrationActive -> HandedOff -> Idle
//! ```
//!
//! Every step is attempted no matter how the ones before it went: a sound
//! that won't play must not keep the notification or the vibration from
//! happening. The wake lock taken in the first step is released when the
//! dispatch ends, however it ends.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{FireIntent, TriggerContext, ACTION_STOP, ACTION_TRIGGER, UNKNOWN_ALARM_ID},
    audio::resolve_tone,
    config::{Config, NotificationTexts},
    error::{AlarmError, Result},
    handoff::{Delivery, HostHandoff},
    keep_alive::KeepAliveSignal,
    notification::{Notification, ALARM_SLOT},
    platform::{Notifier, WakeLockProvider},
    session::PlaybackSession,
    stop::StopCommand,
    vibration::VibrationPattern,
    wake::WakeGuard,
};

const WAKE_LOCK_TAG: &str = "rooster_alarm:AlarmWakeLock";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatchState {
    Armed,
    WakeAcquired,
    ServiceSignaled,
    Notified,
    PlayingAudio,
    VibrationActive,
    HandedOff,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AcquireWake,
    SignalKeepAlive,
    Notify,
    PlayAudio,
    Vibrate,
    HandOff,
}

impl Step {
    /// the state a successful step moves the dispatch into
    #[must_use]
    pub const fn reaches(self) -> DispatchState {
        match self {
            Self::AcquireWake => DispatchState::WakeAcquired,
            Self::SignalKeepAlive => DispatchState::ServiceSignaled,
            Self::Notify => DispatchState::Notified,
            Self::PlayAudio => DispatchState::PlayingAudio,
            Self::Vibrate => DispatchState::VibrationActive,
            Self::HandOff => DispatchState::HandedOff,
        }
    }
}

#[derive(Debug)]
pub struct DispatchReport {
    pub context: TriggerContext,
    pub outcomes: Vec<(Step, Result<()>)>,
    /// states passed through, failed steps leave theirs out
    pub trail: Vec<DispatchState>,
    pub delivery: Option<Delivery>,
}

impl DispatchReport {
    fn new(context: TriggerContext) -> Self {
        Self {
            context,
            outcomes: Vec::new(),
            trail: vec![DispatchState::Armed],
            delivery: None,
        }
    }

    #[must_use]
    pub fn succeeded(&self, step: Step) -> bool {
        self.outcomes
            .iter()
            .any(|(attempted, result)| *attempted == step && result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (Step, &AlarmError)> {
        self.outcomes
            .iter()
            .filter_map(|(step, result)| result.as_ref().err().map(|e| (*step, e)))
    }

    /// Runs one step, recording how it went. Panics in a step count as a
    /// platform failure of that step.
    fn attempt<T>(&mut self, step: Step, run: impl FnOnce() -> Result<T>) -> Option<T> {
        let result = panic::catch_unwind(AssertUnwindSafe(run)).unwrap_or_else(|_| {
            Err(AlarmError::platform("dispatch", format!("{step:?} panicked")))
        });
        match result {
            Ok(value) => {
                debug!(target: "dispatch", "{} {step:?} ok", self.context.id);
                self.trail.push(step.reaches());
                self.outcomes.push((step, Ok(())));
                Some(value)
            }
            Err(e) => {
                error!(target: "dispatch", "{} {step:?} failed: {e}", self.context.id);
                self.outcomes.push((step, Err(e)));
                None
            }
        }
    }
}

#[derive(Debug)]
pub enum FireOutcome {
    Dispatched(DispatchReport),
    Stopped { id: String, was_active: bool },
    Ignored { action: String },
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub wake_timeout: Duration,
    pub vibration: VibrationPattern,
    pub texts: NotificationTexts,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            wake_timeout: Duration::from_secs(10 * 60),
            vibration: VibrationPattern::alarm(),
            texts: NotificationTexts::default(),
        }
    }
}

impl From<&Config> for DispatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            wake_timeout: config.wake_lock_timeout(),
            vibration: config.vibration(),
            texts: config.notifications.clone(),
        }
    }
}

pub struct TriggerDispatcher {
    wake: Arc<dyn WakeLockProvider>,
    keep_alive: Arc<KeepAliveSignal>,
    notifier: Arc<dyn Notifier>,
    session: Arc<PlaybackSession>,
    handoff: Arc<HostHandoff>,
    stop: Arc<StopCommand>,
    settings: DispatchSettings,
}

impl TriggerDispatcher {
    #[must_use]
    pub fn new(
        wake: Arc<dyn WakeLockProvider>,
        keep_alive: Arc<KeepAliveSignal>,
        notifier: Arc<dyn Notifier>,
        session: Arc<PlaybackSession>,
        handoff: Arc<HostHandoff>,
        stop: Arc<StopCommand>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            wake,
            keep_alive,
            notifier,
            session,
            handoff,
            stop,
            settings,
        }
    }

    /// Entry point for intents coming back from the timer or from a
    /// notification action.
    pub fn on_fire(&self, intent: FireIntent) -> FireOutcome {
        debug!(target: "dispatch", "received {}", intent.action);
        match intent.action.as_str() {
            ACTION_TRIGGER => {
                FireOutcome::Dispatched(self.dispatch(TriggerContext::from_extras(&intent.extras)))
            }
            ACTION_STOP => {
                let id = intent.alarm_id().unwrap_or(UNKNOWN_ALARM_ID).to_string();
                let was_active = self.stop.stop(&id);
                FireOutcome::Stopped { id, was_active }
            }
            _ => {
                warn!(target: "dispatch", "ignoring unknown action {}", intent.action);
                FireOutcome::Ignored {
                    action: intent.action,
                }
            }
        }
    }

    /// Runs [`Self::on_fire`] on its own thread, fires don't wait on each
    /// other.
    ///
    /// # Errors
    /// if the thread can't be spawned
    pub fn spawn_fire(self: &Arc<Self>, intent: FireIntent) -> Result<JoinHandle<FireOutcome>> {
        let dispatcher = Arc::clone(self);
        let name = format!("fire-{}", intent.alarm_id().unwrap_or(UNKNOWN_ALARM_ID));
        thread::Builder::new()
            .name(name)
            .spawn(move || dispatcher.on_fire(intent))
            .map_err(|e| AlarmError::platform("dispatch", e.to_string()))
    }

    /// Rings `context`.
    pub fn dispatch(&self, context: TriggerContext) -> DispatchReport {
        info!(
            target: "dispatch",
            "alarm {} firing: {} ({})",
            context.id,
            context.message,
            context.time_label
        );
        let mut report = DispatchReport::new(context.clone());

        // held until the end of this function, whatever happens in between
        let _wake = report.attempt(Step::AcquireWake, || {
            WakeGuard::acquire(&*self.wake, WAKE_LOCK_TAG, self.settings.wake_timeout)
        });

        report.attempt(Step::SignalKeepAlive, || self.keep_alive.start());

        report.attempt(Step::Notify, || {
            self.notifier.post(
                ALARM_SLOT,
                Notification::alarm(&context, &self.settings.vibration, &self.settings.texts),
            )
        });

        {
            let mut starting = self.session.begin();
            let tone = resolve_tone(context.audio.as_deref());
            report.attempt(Step::PlayAudio, || starting.play(&tone));
            report.attempt(Step::Vibrate, || starting.vibrate(&self.settings.vibration));
        }

        report.delivery = report.attempt(Step::HandOff, || Ok(self.handoff.deliver(context)));

        report.trail.push(DispatchState::Idle);
        info!(
            target: "dispatch",
            "alarm {} dispatched with {} failed step(s)",
            report.context.id,
            report.failures().count()
        );
        report
    }
}
