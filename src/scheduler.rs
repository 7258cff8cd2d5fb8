use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
};

use log::{debug, error, info, warn};

use crate::{
    alarm::{AlarmRequest, FireIntent, RequestCode},
    error::{AlarmError, Result},
    platform::{TimerBackend, WakeFidelity},
    stop::StopCommand,
};

/// Turns alarm requests into timer registrations.
///
/// Registrations are keyed by [`RequestCode`], so scheduling an id again
/// replaces the earlier registration. The ids scheduled through here are
/// remembered so [`Self::cancel_all`] can reach every one of them, and
/// forgotten once their registration has fired.
pub struct AlarmScheduler {
    timer: Arc<dyn TimerBackend>,
    stop: Arc<StopCommand>,
    outstanding: Mutex<BTreeSet<String>>,
}

impl AlarmScheduler {
    #[must_use]
    pub fn new(timer: Arc<dyn TimerBackend>, stop: Arc<StopCommand>) -> Self {
        Self {
            timer,
            stop,
            outstanding: Mutex::new(BTreeSet::new()),
        }
    }

    /// Registers `request` with the most precise timer available.
    ///
    /// Trigger instants in the past are passed through and fire as soon as
    /// possible.
    ///
    /// # Errors
    /// [`AlarmError::PermissionDenied`] if exact alarms aren't allowed, the
    /// permission surface has been opened and the caller should retry once
    /// the user grants it.
    pub fn schedule(&self, request: &AlarmRequest) -> Result<WakeFidelity> {
        if !self.timer.can_schedule_exact() {
            error!(target: "scheduler", "cannot schedule exact alarms, permission required");
            self.timer.open_permission_surface();
            return Err(AlarmError::PermissionDenied);
        }
        let fidelity = self
            .timer
            .fidelities()
            .into_iter()
            .max()
            .ok_or_else(|| AlarmError::platform("timer", "no exact timers available"))?;
        let code = request.request_code();
        self.timer.register(
            code,
            request.trigger_at,
            fidelity,
            FireIntent::trigger(request),
        )?;
        let mut ids = self.lock();
        self.prune(&mut ids);
        ids.insert(request.id.clone());
        drop(ids);
        info!(
            target: "scheduler",
            "scheduled {} ({code}) for {} using {fidelity:?}",
            request.id,
            request.trigger_at
        );
        Ok(fidelity)
    }

    /// Deregisters `id`.
    ///
    /// # Errors
    /// [`AlarmError::NotFound`] if nothing was registered for `id`, which
    /// callers treat as success
    pub fn cancel(&self, id: &str) -> Result<()> {
        let code = RequestCode::for_id(id);
        let removed = self.timer.cancel(code)?;
        self.lock().remove(id);
        if removed {
            info!(target: "scheduler", "cancelled {id} ({code})");
            Ok(())
        } else {
            debug!(target: "scheduler", "nothing to cancel for {id} ({code})");
            Err(AlarmError::NotFound(id.to_string()))
        }
    }

    /// Deregisters every id scheduled here and silences anything ringing.
    ///
    /// Returns how many registrations were removed.
    pub fn cancel_all(&self) -> usize {
        let ids = std::mem::take(&mut *self.lock());
        let cancelled = ids
            .iter()
            .filter(|id| match self.timer.cancel(RequestCode::for_id(id)) {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(target: "scheduler", "couldn't cancel {id}: {e}");
                    false
                }
            })
            .count();
        self.stop.stop("all");
        info!(target: "scheduler", "cancelled {cancelled} alarm(s)");
        cancelled
    }

    #[must_use]
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.timer.lookup(RequestCode::for_id(id))
    }

    /// Ids scheduled here that still have a registration.
    #[must_use]
    pub fn outstanding(&self) -> Vec<String> {
        let mut ids = self.lock();
        self.prune(&mut ids);
        ids.iter().cloned().collect()
    }

    /// Drops ids whose registration has fired or gone away.
    fn prune(&self, ids: &mut BTreeSet<String>) {
        ids.retain(|id| self.timer.lookup(RequestCode::for_id(id)));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use chrono::{DateTime, TimeDelta, Utc};

    use super::*;
    use crate::{
        notification::NotificationShade,
        platform::AlarmTone,
        session::{
            tests::{CountingAudio, CountingVibrator},
            PlaybackSession,
        },
        timer::ThreadTimer,
        vibration::VibrationPattern,
    };

    fn tomorrow() -> DateTime<Utc> {
        Utc::now() + TimeDelta::days(1)
    }

    fn session() -> Arc<PlaybackSession> {
        Arc::new(PlaybackSession::new(
            Arc::new(CountingAudio::default()),
            Arc::new(CountingVibrator::default()),
        ))
    }

    fn scheduler_with(
        timer: Arc<dyn TimerBackend>,
        session: Arc<PlaybackSession>,
    ) -> AlarmScheduler {
        let stop = Arc::new(StopCommand::new(session, Arc::new(NotificationShade::new())));
        AlarmScheduler::new(timer, stop)
    }

    fn scheduler() -> (AlarmScheduler, Arc<ThreadTimer>) {
        let (timer, _fired) = ThreadTimer::spawn(true).unwrap();
        let timer = Arc::new(timer);
        (scheduler_with(timer.clone(), session()), timer)
    }

    #[test]
    fn schedule_then_cancel() {
        let (scheduler, _timer) = scheduler();
        let request = AlarmRequest::new("morning", tomorrow(), "Wake up", "07:00");
        assert_eq!(
            scheduler.schedule(&request).unwrap(),
            WakeFidelity::AlarmClock
        );
        assert!(scheduler.is_scheduled("morning"));

        scheduler.cancel("morning").unwrap();
        assert!(!scheduler.is_scheduled("morning"));
    }

    #[test]
    fn cancel_unknown_is_not_found() {
        let (scheduler, _timer) = scheduler();
        assert!(matches!(
            scheduler.cancel("nope"),
            Err(AlarmError::NotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn rescheduling_replaces() {
        let (scheduler, timer) = scheduler();
        let first = AlarmRequest::new("a", tomorrow(), "m", "t");
        let second = AlarmRequest::new("a", tomorrow() + TimeDelta::hours(1), "m", "t");
        scheduler.schedule(&first).unwrap();
        scheduler.schedule(&second).unwrap();
        let registration = timer.registration(RequestCode::for_id("a")).unwrap();
        assert_eq!(registration.at, second.trigger_at);
        assert_eq!(scheduler.outstanding(), vec!["a".to_string()]);
    }

    #[test]
    fn falls_back_to_lower_fidelity() {
        let (timer, _fired) = ThreadTimer::spawn(true).unwrap();
        let timer = Arc::new(timer.with_fidelities(vec![WakeFidelity::Exact]));
        let scheduler = scheduler_with(timer, session());
        let request = AlarmRequest::new("a", tomorrow(), "m", "t");
        assert_eq!(scheduler.schedule(&request).unwrap(), WakeFidelity::Exact);
    }

    #[test]
    fn cancel_all_clears_timers_and_session() {
        let (timer, _fired) = ThreadTimer::spawn(true).unwrap();
        let timer = Arc::new(timer);
        let session = session();
        let scheduler = scheduler_with(timer.clone(), session.clone());
        for id in ["a", "b", "c"] {
            scheduler
                .schedule(&AlarmRequest::new(id, tomorrow(), "m", "t"))
                .unwrap();
        }
        let _ = session.start(&AlarmTone::Default, &VibrationPattern::alarm());

        assert_eq!(scheduler.cancel_all(), 3);
        assert!(!session.is_active());
        for id in ["a", "b", "c"] {
            assert!(!scheduler.is_scheduled(id));
        }
        assert!(scheduler.outstanding().is_empty());
    }

    #[test]
    fn fired_ids_are_forgotten() {
        let (timer, fired) = ThreadTimer::spawn(true).unwrap();
        let scheduler = scheduler_with(Arc::new(timer), session());
        for i in 0..50 {
            let request = AlarmRequest::new(format!("alarm-{i}"), Utc::now(), "m", "t");
            scheduler.schedule(&request).unwrap();
            fired.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        // only the last one, which fired after it was recorded
        assert_eq!(scheduler.lock().len(), 1);
        assert!(scheduler.outstanding().is_empty());
    }

    /// Registers fine, then fails every cancel.
    #[derive(Default)]
    struct StuckTimer {
        codes: Mutex<BTreeSet<RequestCode>>,
    }

    impl TimerBackend for StuckTimer {
        fn fidelities(&self) -> Vec<WakeFidelity> {
            vec![WakeFidelity::AlarmClock]
        }

        fn can_schedule_exact(&self) -> bool {
            true
        }

        fn open_permission_surface(&self) {}

        fn register(
            &self,
            code: RequestCode,
            _at: DateTime<Utc>,
            _fidelity: WakeFidelity,
            _intent: FireIntent,
        ) -> Result<()> {
            self.codes.lock().unwrap().insert(code);
            Ok(())
        }

        fn cancel(&self, _code: RequestCode) -> Result<bool> {
            Err(AlarmError::platform("timer", "backend went away"))
        }

        fn lookup(&self, code: RequestCode) -> bool {
            self.codes.lock().unwrap().contains(&code)
        }
    }

    #[test]
    fn failed_cancel_keeps_tracking_the_id() {
        let scheduler = scheduler_with(Arc::new(StuckTimer::default()), session());
        let request = AlarmRequest::new("a", tomorrow(), "m", "t");
        scheduler.schedule(&request).unwrap();

        assert!(matches!(
            scheduler.cancel("a"),
            Err(AlarmError::Platform { .. })
        ));
        assert_eq!(scheduler.outstanding(), vec!["a".to_string()]);
    }

    #[derive(Default)]
    struct DeniedTimer {
        surfaced: AtomicUsize,
        registered: AtomicBool,
    }

    impl TimerBackend for DeniedTimer {
        fn fidelities(&self) -> Vec<WakeFidelity> {
            vec![WakeFidelity::AlarmClock]
        }

        fn can_schedule_exact(&self) -> bool {
            false
        }

        fn open_permission_surface(&self) {
            self.surfaced.fetch_add(1, Ordering::SeqCst);
        }

        fn register(
            &self,
            _code: RequestCode,
            _at: DateTime<Utc>,
            _fidelity: WakeFidelity,
            _intent: FireIntent,
        ) -> Result<()> {
            self.registered.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn cancel(&self, _code: RequestCode) -> Result<bool> {
            Ok(false)
        }

        fn lookup(&self, _code: RequestCode) -> bool {
            false
        }
    }

    #[test]
    fn denied_permission_opens_surface_once_per_attempt() {
        let timer = Arc::new(DeniedTimer::default());
        let scheduler = scheduler_with(timer.clone(), session());
        let request = AlarmRequest::new("a", tomorrow(), "m", "t");
        assert!(matches!(
            scheduler.schedule(&request),
            Err(AlarmError::PermissionDenied)
        ));
        assert_eq!(timer.surfaced.load(Ordering::SeqCst), 1);
        assert!(!timer.registered.load(Ordering::SeqCst));

        let _ = scheduler.schedule(&request);
        assert_eq!(timer.surfaced.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_after_grant_succeeds() {
        let (timer, _fired) = ThreadTimer::spawn(false).unwrap();
        let timer = Arc::new(timer);
        let scheduler = scheduler_with(timer.clone(), session());
        let request = AlarmRequest::new("a", tomorrow(), "m", "t");
        assert!(scheduler.schedule(&request).is_err());
        timer.grant_exact(true);
        assert!(scheduler.schedule(&request).is_ok());
        assert!(scheduler.is_scheduled("a"));
    }
}
