use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AlarmError, Result},
    platform::{VibrationHandle, Vibrator},
};

/// Alternating off/on timings in milliseconds, starting with off, repeated
/// from the start forever.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "RawPattern")]
pub struct VibrationPattern {
    timings: Vec<u64>,
}

#[derive(Deserialize)]
struct RawPattern {
    timings: Vec<u64>,
}

impl TryFrom<RawPattern> for VibrationPattern {
    type Error = String;

    fn try_from(raw: RawPattern) -> Result<Self, Self::Error> {
        let message = format!("vibration pattern {:?} never turns the motor on", raw.timings);
        Self::new(raw.timings).ok_or(message)
    }
}

impl VibrationPattern {
    /// `None` if the pattern never turns the motor on.
    #[must_use]
    pub fn new(timings: Vec<u64>) -> Option<Self> {
        timings
            .iter()
            .skip(1)
            .step_by(2)
            .any(|on| *on > 0)
            .then_some(Self { timings })
    }

    /// off 0, on 1000, off 500, on 1000, off 500, on 1000
    #[must_use]
    pub fn alarm() -> Self {
        Self {
            timings: vec![0, 1000, 500, 1000, 500, 1000],
        }
    }

    #[must_use]
    pub fn timings(&self) -> &[u64] {
        &self.timings
    }

    /// One pass over the pattern as (motor on, how long).
    pub fn segments(&self) -> impl Iterator<Item = (bool, Duration)> + '_ {
        self.timings
            .iter()
            .enumerate()
            .map(|(i, ms)| (i % 2 == 1, Duration::from_millis(*ms)))
    }
}

/// Something that can be switched on and off.
pub trait Motor: Send + Sync {
    fn set(&self, on: bool);
}

/// Stand in for machines without a vibration motor, it only traces.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMotor;

impl Motor for LogMotor {
    fn set(&self, on: bool) {
        trace!(target: "vibration", "motor {}", if on { "on" } else { "off" });
    }
}

/// Plays a [`VibrationPattern`] on a [`Motor`] from a background thread.
pub struct PatternVibrator {
    motor: Arc<dyn Motor>,
    present: bool,
}

impl PatternVibrator {
    #[must_use]
    pub fn new(motor: Arc<dyn Motor>, present: bool) -> Self {
        Self { motor, present }
    }
}

impl Vibrator for PatternVibrator {
    fn has_vibrator(&self) -> bool {
        self.present
    }

    fn vibrate(&self, pattern: &VibrationPattern) -> Result<Box<dyn VibrationHandle>> {
        let (cancel, cancelled) = bounded::<()>(1);
        let motor = Arc::clone(&self.motor);
        let waveform = pattern.clone();
        let thread = thread::Builder::new()
            .name("vibration".to_string())
            .spawn(move || {
                'pattern: loop {
                    for (on, length) in waveform.segments() {
                        motor.set(on);
                        match cancelled.recv_timeout(length) {
                            Err(RecvTimeoutError::Timeout) => {}
                            // cancelled or the handle is gone
                            _ => break 'pattern,
                        }
                    }
                }
                motor.set(false);
            })
            .map_err(|e| AlarmError::platform("vibrator", e.to_string()))?;
        debug!(target: "vibration", "started waveform {:?}", pattern.timings());
        Ok(Box::new(PatternHandle {
            cancel,
            thread: Some(thread),
        }))
    }
}

struct PatternHandle {
    cancel: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl VibrationHandle for PatternHandle {
    fn cancel(&mut self) {
        if let Some(thread) = self.thread.take() {
            // the thread may already be gone, in which case there's nothing to stop
            let _ = self.cancel.try_send(());
            let _ = thread.join();
            debug!(target: "vibration", "waveform cancelled");
        }
    }
}

impl Drop for PatternHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
