use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};

use crate::{
    alarm::{AlarmRequest, FireIntent, TriggerContext},
    dispatch::{DispatchSettings, FireOutcome, TriggerDispatcher},
    error::AlarmError,
    handoff::HostHandoff,
    keep_alive::KeepAliveSignal,
    platform::{AudioOutput, Notifier, Residency, TimerBackend, Vibrator, WakeLockProvider},
    scheduler::AlarmScheduler,
    session::PlaybackSession,
    stop::StopCommand,
};

/// Everything the service needs from the outside world.
pub struct Platform {
    pub timer: Arc<dyn TimerBackend>,
    pub wake: Arc<dyn WakeLockProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub audio: Arc<dyn AudioOutput>,
    pub vibrator: Arc<dyn Vibrator>,
    pub residency: Arc<dyn Residency>,
}

/// What the host application talks to.
///
/// Every call answers with a plain value; failures are logged here and
/// never reach the host as errors.
pub struct AlarmService {
    timer: Arc<dyn TimerBackend>,
    scheduler: AlarmScheduler,
    dispatcher: Arc<TriggerDispatcher>,
    session: Arc<PlaybackSession>,
    stop: Arc<StopCommand>,
    keep_alive: Arc<KeepAliveSignal>,
    handoff: Arc<HostHandoff>,
}

impl AlarmService {
    #[must_use]
    pub fn new(platform: Platform, settings: DispatchSettings) -> Self {
        let session = Arc::new(PlaybackSession::new(platform.audio, platform.vibrator));
        let stop = Arc::new(StopCommand::new(
            Arc::clone(&session),
            Arc::clone(&platform.notifier),
        ));
        let keep_alive = Arc::new(KeepAliveSignal::new(
            platform.residency,
            Arc::clone(&platform.notifier),
            settings.texts.clone(),
        ));
        let handoff = Arc::new(HostHandoff::new());
        let dispatcher = Arc::new(TriggerDispatcher::new(
            platform.wake,
            Arc::clone(&keep_alive),
            platform.notifier,
            Arc::clone(&session),
            Arc::clone(&handoff),
            Arc::clone(&stop),
            settings,
        ));
        Self {
            scheduler: AlarmScheduler::new(Arc::clone(&platform.timer), Arc::clone(&stop)),
            timer: platform.timer,
            dispatcher,
            session,
            stop,
            keep_alive,
            handoff,
        }
    }

    /// Brings the keep alive signal up, as a freshly launched host does.
    pub fn initialize(&self) -> bool {
        self.keep_alive
            .start()
            .map_err(|e| error!("couldn't start keep alive: {e}"))
            .is_ok()
    }

    /// `false` when exact alarms aren't permitted: the permission surface
    /// has been opened and the host should try again after the user grants
    /// it.
    pub fn schedule(&self, request: &AlarmRequest) -> bool {
        match self.scheduler.schedule(request) {
            Ok(_) => true,
            Err(e) => {
                error!("error scheduling alarm {}: {e}", request.id);
                false
            }
        }
    }

    pub fn cancel(&self, id: &str) -> bool {
        match self.scheduler.cancel(id) {
            Ok(()) | Err(AlarmError::NotFound(_)) => true,
            Err(e) => {
                error!("error cancelling alarm {id}: {e}");
                false
            }
        }
    }

    pub fn cancel_all(&self) -> bool {
        let cancelled = self.scheduler.cancel_all();
        debug!("cancel all removed {cancelled} registration(s)");
        true
    }

    #[must_use]
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.scheduler.is_scheduled(id)
    }

    /// Silences whatever is ringing, whichever id it is for.
    pub fn stop(&self, id: &str) -> bool {
        self.stop.stop(id);
        true
    }

    /// The host's readiness probe. Each undelivered alarm is handed out
    /// once.
    #[must_use]
    pub fn check_pending_alarm(&self) -> Option<TriggerContext> {
        self.handoff.take_pending()
    }

    /// Reports whether exact alarms are granted, opening the permission
    /// surface if they aren't.
    pub fn request_exact_alarm_permission(&self) -> bool {
        if self.timer.can_schedule_exact() {
            true
        } else {
            info!("exact alarm permission missing, asking for it");
            self.timer.open_permission_surface();
            false
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    #[must_use]
    pub fn outstanding(&self) -> Vec<String> {
        self.scheduler.outstanding()
    }

    /// Handles an intent from the timer or a notification action on the
    /// calling thread.
    pub fn fire(&self, intent: FireIntent) -> FireOutcome {
        self.dispatcher.on_fire(intent)
    }

    /// Handles an intent on a thread of its own.
    pub fn spawn_fire(&self, intent: FireIntent) {
        if let Err(e) = self.dispatcher.spawn_fire(intent) {
            error!("couldn't dispatch fired alarm: {e}");
        }
    }

    /// The host is ready for alarms as they happen.
    pub fn attach_host(&self) -> Receiver<TriggerContext> {
        self.handoff.attach()
    }

    /// An alarm the host was sent but never got.
    pub fn return_undelivered(&self, context: TriggerContext) {
        warn!("host missed alarm {}, keeping it for the next check", context.id);
        self.handoff.buffer(context);
    }

    /// Winds down everything that's keeping the process alive.
    pub fn shutdown(&self) {
        self.stop.stop("shutdown");
        if let Err(e) = self.keep_alive.stop() {
            warn!("couldn't stop keep alive: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::{
        keep_alive::DaemonResidency,
        notification::{NotificationShade, KEEP_ALIVE_SLOT},
        session::tests::{CountingAudio, CountingVibrator},
        timer::ThreadTimer,
        wake::ProcessWakeLocks,
    };

    fn service(exact_granted: bool) -> (AlarmService, Arc<ThreadTimer>, Arc<NotificationShade>) {
        let (timer, _fired) = ThreadTimer::spawn(exact_granted).unwrap();
        let timer = Arc::new(timer);
        let shade = Arc::new(NotificationShade::new());
        let service = AlarmService::new(
            Platform {
                timer: timer.clone(),
                wake: Arc::new(ProcessWakeLocks::new()),
                notifier: shade.clone(),
                audio: Arc::new(CountingAudio::default()),
                vibrator: Arc::new(CountingVibrator::default()),
                residency: Arc::new(DaemonResidency::new()),
            },
            DispatchSettings::default(),
        );
        (service, timer, shade)
    }

    #[test]
    fn initialize_posts_keep_alive() {
        let (service, _, shade) = service(true);
        assert!(service.initialize());
        assert!(shade.get(KEEP_ALIVE_SLOT).is_some());
        service.shutdown();
        assert!(shade.get(KEEP_ALIVE_SLOT).is_none());
    }

    #[test]
    fn host_calls_answer_with_bools() {
        let (service, _, _) = service(true);
        let request = AlarmRequest::new("a", Utc::now() + TimeDelta::days(1), "m", "t");
        assert!(service.schedule(&request));
        assert!(service.is_scheduled("a"));
        assert!(service.cancel("a"));
        assert!(!service.is_scheduled("a"));
        assert!(service.cancel("a"));
        assert!(service.stop("a"));
        assert!(service.cancel_all());
        assert_eq!(service.check_pending_alarm(), None);
    }

    #[test]
    fn permission_flow() {
        let (service, timer, _) = service(false);
        let request = AlarmRequest::new("a", Utc::now() + TimeDelta::days(1), "m", "t");
        assert!(!service.request_exact_alarm_permission());
        assert!(!service.schedule(&request));
        assert!(!service.is_scheduled("a"));

        timer.grant_exact(true);
        assert!(service.request_exact_alarm_permission());
        assert!(service.schedule(&request));
        assert!(service.is_scheduled("a"));
    }
}
