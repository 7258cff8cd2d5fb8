//! Wake timers for the daemon, kept in a table and fired from a
//! background thread.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::{
    alarm::{FireIntent, RequestCode},
    error::{AlarmError, Result},
    platform::{TimerBackend, WakeFidelity},
};

/// longest the timer thread sleeps before rechecking the clock, so
/// wall clock jumps (suspend, clock changes) are noticed
const MAX_SLEEP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub at: DateTime<Utc>,
    pub fidelity: WakeFidelity,
    pub intent: FireIntent,
}

type Table = Arc<Mutex<BTreeMap<RequestCode, Registration>>>;

pub struct ThreadTimer {
    table: Table,
    nudge: Sender<()>,
    exact_granted: AtomicBool,
    fidelities: Vec<WakeFidelity>,
}

impl ThreadTimer {
    /// Starts the timer thread. Fired intents come out of the returned
    /// receiver.
    ///
    /// # Errors
    /// if the timer thread can't be spawned
    pub fn spawn(exact_granted: bool) -> Result<(Self, Receiver<FireIntent>)> {
        let table = Table::default();
        let (nudge, nudged) = bounded(1);
        let (fire, fired) = unbounded();
        let worker_table = Arc::clone(&table);
        thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || run(&worker_table, &nudged, &fire))
            .map_err(|e| AlarmError::platform("timer", e.to_string()))?;
        Ok((
            Self {
                table,
                nudge,
                exact_granted: AtomicBool::new(exact_granted),
                fidelities: vec![
                    WakeFidelity::Exact,
                    WakeFidelity::ExactAllowWhileIdle,
                    WakeFidelity::AlarmClock,
                ],
            },
            fired,
        ))
    }

    /// Limits which fidelities this timer claims to support.
    #[must_use]
    pub fn with_fidelities(mut self, fidelities: Vec<WakeFidelity>) -> Self {
        self.fidelities = fidelities;
        self
    }

    /// What the user does on the permission surface.
    pub fn grant_exact(&self, granted: bool) {
        self.exact_granted.store(granted, Ordering::SeqCst);
        info!(target: "timer", "exact alarms {}", if granted { "granted" } else { "revoked" });
    }

    #[must_use]
    pub fn registration(&self, code: RequestCode) -> Option<Registration> {
        self.lock().get(&code).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<RequestCode, Registration>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_worker(&self) {
        // a full channel already means the worker will recheck
        let _ = self.nudge.try_send(());
    }
}

fn run(table: &Table, nudged: &Receiver<()>, fire: &Sender<FireIntent>) {
    loop {
        let now = Utc::now();
        let due: Vec<_> = {
            let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
            let codes: Vec<_> = table
                .iter()
                .filter(|(_, registration)| registration.at <= now)
                .map(|(code, _)| *code)
                .collect();
            codes
                .into_iter()
                .filter_map(|code| table.remove(&code).map(|r| (code, r)))
                .collect()
        };
        for (code, registration) in due {
            debug!(target: "timer", "firing {code} due at {}", registration.at);
            if fire.send(registration.intent).is_err() {
                warn!(target: "timer", "nobody is listening for fired alarms");
            }
        }

        let sleep = table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|registration| registration.at)
            .min()
            .map_or(MAX_SLEEP, |next| {
                (next - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(MAX_SLEEP)
            });
        match nudged.recv_timeout(sleep) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(target: "timer", "timer thread exiting");
}

impl TimerBackend for ThreadTimer {
    fn fidelities(&self) -> Vec<WakeFidelity> {
        self.fidelities.clone()
    }

    fn can_schedule_exact(&self) -> bool {
        self.exact_granted.load(Ordering::SeqCst)
    }

    fn open_permission_surface(&self) {
        warn!(
            target: "timer",
            "exact alarms are not allowed, grant them with `rooster_alarm grant-permission`"
        );
    }

    fn register(
        &self,
        code: RequestCode,
        at: DateTime<Utc>,
        fidelity: WakeFidelity,
        intent: FireIntent,
    ) -> Result<()> {
        if self
            .lock()
            .insert(
                code,
                Registration {
                    at,
                    fidelity,
                    intent,
                },
            )
            .is_some()
        {
            debug!(target: "timer", "replaced registration {code}");
        }
        self.wake_worker();
        Ok(())
    }

    fn cancel(&self, code: RequestCode) -> Result<bool> {
        let removed = self.lock().remove(&code).is_some();
        self.wake_worker();
        Ok(removed)
    }

    fn lookup(&self, code: RequestCode) -> bool {
        self.lock().contains_key(&code)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::alarm::AlarmRequest;

    fn intent(id: &str) -> FireIntent {
        FireIntent::trigger(&AlarmRequest::new(id, Utc::now(), "m", "t"))
    }

    #[test]
    fn past_registrations_fire_right_away() {
        let (timer, fired) = ThreadTimer::spawn(true).unwrap();
        let code = RequestCode::for_id("late");
        timer
            .register(
                code,
                Utc::now() - TimeDelta::hours(1),
                WakeFidelity::AlarmClock,
                intent("late"),
            )
            .unwrap();
        let fired = fired.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired.alarm_id(), Some("late"));
        assert!(!timer.lookup(code));
    }

    #[test]
    fn replacement_fires_once() {
        let (timer, fired) = ThreadTimer::spawn(true).unwrap();
        let code = RequestCode::for_id("a");
        let far = Utc::now() + TimeDelta::days(1);
        timer
            .register(code, far, WakeFidelity::AlarmClock, intent("a"))
            .unwrap();
        timer
            .register(
                code,
                Utc::now() + TimeDelta::milliseconds(50),
                WakeFidelity::AlarmClock,
                intent("a"),
            )
            .unwrap();
        assert!(fired.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(fired.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn cancel_and_lookup() {
        let (timer, _fired) = ThreadTimer::spawn(true).unwrap();
        let code = RequestCode::for_id("a");
        assert!(!timer.cancel(code).unwrap());
        timer
            .register(
                code,
                Utc::now() + TimeDelta::days(1),
                WakeFidelity::Exact,
                intent("a"),
            )
            .unwrap();
        assert!(timer.lookup(code));
        assert_eq!(
            timer.registration(code).map(|r| r.fidelity),
            Some(WakeFidelity::Exact)
        );
        assert!(timer.cancel(code).unwrap());
        assert!(!timer.lookup(code));
    }

    #[test]
    fn grant_toggles_permission() {
        let (timer, _fired) = ThreadTimer::spawn(false).unwrap();
        assert!(!timer.can_schedule_exact());
        timer.grant_exact(true);
        assert!(timer.can_schedule_exact());
    }
}
