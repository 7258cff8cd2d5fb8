//! Seams between the alarm lifecycle and whatever is playing the part of
//! the operating system.
//!
//! The daemon wires these up with the desktop implementations in
//! [`crate::timer`], [`crate::audio`], [`crate::vibration`],
//! [`crate::notification`], [`crate::wake`] and [`crate::keep_alive`].

use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{FireIntent, RequestCode},
    error::Result,
    notification::{Notification, NotificationSlot},
    vibration::VibrationPattern,
};

/// How precisely a registered timer wakes the device, lowest first.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WakeFidelity {
    /// exact, but may be deferred by battery saving
    Exact,
    /// exact, allowed to run while the device idles
    ExactAllowWhileIdle,
    /// a user visible alarm clock, never deferred
    AlarmClock,
}

/// A one-shot wake timer subsystem.
pub trait TimerBackend: Send + Sync {
    /// Every fidelity the platform can register with.
    fn fidelities(&self) -> Vec<WakeFidelity>;

    fn can_schedule_exact(&self) -> bool;

    /// Sends the user to wherever the exact alarm capability is granted.
    fn open_permission_surface(&self);

    /// Registers `intent` to be fired at `at`, replacing whatever already
    /// occupies `code`.
    fn register(
        &self,
        code: RequestCode,
        at: DateTime<Utc>,
        fidelity: WakeFidelity,
        intent: FireIntent,
    ) -> Result<()>;

    /// Returns whether anything was registered under `code`.
    fn cancel(&self, code: RequestCode) -> Result<bool>;

    /// Looks for a registration without creating one.
    fn lookup(&self, code: RequestCode) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WakeLockId(pub u64);

pub trait WakeLockProvider: Send + Sync {
    /// Keeps the device awake for at most `timeout`.
    fn acquire(&self, tag: &str, timeout: Duration) -> Result<WakeLockId>;

    fn release(&self, id: WakeLockId);
}

pub trait Notifier: Send + Sync {
    /// Posts `notification`, replacing anything already in `slot`.
    fn post(&self, slot: NotificationSlot, notification: Notification) -> Result<()>;

    fn cancel(&self, slot: NotificationSlot) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum AlarmTone {
    /// a user supplied file, already checked to be readable
    Custom(PathBuf),
    /// whatever the platform uses for alarms
    Default,
}

/// Audio routed as an alarm: alarm volume, and it ignores silent profiles.
pub trait AudioOutput: Send + Sync {
    /// Starts `tone` looping until the handle is stopped.
    fn play_looping(&self, tone: &AlarmTone) -> Result<Box<dyn AudioHandle>>;
}

pub trait AudioHandle: Send {
    fn is_playing(&self) -> bool;

    /// Halts and releases the output. Stopping twice is harmless.
    fn stop(&mut self);
}

pub trait Vibrator: Send + Sync {
    fn has_vibrator(&self) -> bool;

    fn vibrate(&self, pattern: &VibrationPattern) -> Result<Box<dyn VibrationHandle>>;
}

pub trait VibrationHandle: Send {
    fn cancel(&mut self);
}

/// Asks the host environment not to reclaim the process.
pub trait Residency: Send + Sync {
    fn hold(&self) -> Result<()>;

    fn release(&self) -> Result<()>;
}
