use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use log::{debug, info};

use crate::{
    config::NotificationTexts,
    error::Result,
    notification::{Notification, KEEP_ALIVE_SLOT},
    platform::{Notifier, Residency},
};

/// Keeps the process around while an alarm might still need it, and says
/// so with a quiet ongoing notification.
pub struct KeepAliveSignal {
    residency: Arc<dyn Residency>,
    notifier: Arc<dyn Notifier>,
    texts: NotificationTexts,
    running: Mutex<bool>,
}

impl KeepAliveSignal {
    #[must_use]
    pub fn new(
        residency: Arc<dyn Residency>,
        notifier: Arc<dyn Notifier>,
        texts: NotificationTexts,
    ) -> Self {
        Self {
            residency,
            notifier,
            texts,
            running: Mutex::new(false),
        }
    }

    /// Starting while already running just refreshes the notification.
    ///
    /// # Errors
    /// if residency can't be requested or the notification can't be posted
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if *running {
            debug!(target: "keep_alive", "already running, refreshing");
        } else {
            self.residency.hold()?;
            *running = true;
            info!(target: "keep_alive", "keep alive started");
        }
        self.notifier
            .post(KEEP_ALIVE_SLOT, Notification::keep_alive(&self.texts))
    }

    /// # Errors
    /// if residency can't be released
    pub fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !*running {
            return Ok(());
        }
        self.residency.release()?;
        *running = false;
        info!(target: "keep_alive", "keep alive stopped");
        self.notifier.cancel(KEEP_ALIVE_SLOT)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Residency for the daemon: while held the daemon refuses to shut down
/// unless forced.
#[derive(Debug, Default)]
pub struct DaemonResidency {
    held: AtomicBool,
}

impl DaemonResidency {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl Residency for DaemonResidency {
    fn hold(&self) -> Result<()> {
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{NotificationShade, Priority};

    fn signal() -> (KeepAliveSignal, Arc<DaemonResidency>, Arc<NotificationShade>) {
        let residency = Arc::new(DaemonResidency::new());
        let shade = Arc::new(NotificationShade::new());
        (
            KeepAliveSignal::new(residency.clone(), shade.clone(), NotificationTexts::default()),
            residency,
            shade,
        )
    }

    #[test]
    fn start_holds_and_notifies() {
        let (signal, residency, shade) = signal();
        signal.start().unwrap();
        assert!(signal.is_running());
        assert!(residency.is_held());
        let notification = shade.get(KEEP_ALIVE_SLOT).unwrap();
        assert_eq!(notification.priority, Priority::Low);
        assert_eq!(notification.title, "Rooster Alarm Active");
    }

    #[test]
    fn repeated_start_is_a_refresh() {
        let (signal, residency, shade) = signal();
        signal.start().unwrap();
        signal.start().unwrap();
        assert!(residency.is_held());
        assert_eq!(shade.posted().len(), 1);
    }

    #[test]
    fn stop_releases() {
        let (signal, residency, shade) = signal();
        signal.stop().unwrap();
        signal.start().unwrap();
        signal.stop().unwrap();
        assert!(!signal.is_running());
        assert!(!residency.is_held());
        assert!(shade.get(KEEP_ALIVE_SLOT).is_none());
    }
}
