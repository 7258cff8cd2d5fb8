//! The one sound + vibration output that may be live at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::{
    error::{AlarmError, Result},
    platform::{AlarmTone, AudioHandle, AudioOutput, VibrationHandle, Vibrator},
    vibration::VibrationPattern,
};

#[derive(Default)]
struct Handles {
    audio: Option<Box<dyn AudioHandle>>,
    vibration: Option<Box<dyn VibrationHandle>>,
}

impl Handles {
    fn is_active(&self) -> bool {
        self.audio.as_ref().is_some_and(|audio| audio.is_playing()) || self.vibration.is_some()
    }

    /// Returns whether anything was active.
    fn release(&mut self) -> bool {
        let was_active = self.is_active();
        if let Some(mut audio) = self.audio.take() {
            if audio.is_playing() {
                debug!(target: "session", "halting audio");
            }
            audio.stop();
        }
        if let Some(mut vibration) = self.vibration.take() {
            vibration.cancel();
            debug!(target: "session", "vibration stopped");
        }
        was_active
    }
}

/// Owner of the live playback handles.
///
/// Every entry point (fire, notification action, host request) shares the
/// same `Arc<PlaybackSession>`. Starting always releases whatever was
/// playing first, under the same lock, so only the latest start is audible.
pub struct PlaybackSession {
    audio: Arc<dyn AudioOutput>,
    vibrator: Arc<dyn Vibrator>,
    handles: Mutex<Handles>,
}

/// Outcome of each half of [`PlaybackSession::start`].
#[derive(Debug)]
pub struct SessionStart {
    pub audio: Result<()>,
    pub vibration: Result<()>,
}

impl PlaybackSession {
    #[must_use]
    pub fn new(audio: Arc<dyn AudioOutput>, vibrator: Arc<dyn Vibrator>) -> Self {
        Self {
            audio,
            vibrator,
            handles: Mutex::new(Handles::default()),
        }
    }

    /// Stops anything already playing and hands out exclusive access for
    /// starting the replacement. Nobody else can start or stop until the
    /// returned value is dropped.
    pub fn begin(&self) -> Starting<'_> {
        let mut handles = self.lock();
        if handles.release() {
            info!(target: "session", "superseding the active session");
        }
        Starting {
            session: self,
            handles,
        }
    }

    /// Starts `tone` looping and `pattern` repeating. The two halves start
    /// independently, a failure in one leaves the other running.
    pub fn start(&self, tone: &AlarmTone, pattern: &VibrationPattern) -> SessionStart {
        let mut starting = self.begin();
        let audio = starting.play(tone);
        let vibration = starting.vibrate(pattern);
        SessionStart { audio, vibration }
    }

    /// Halts playback and vibration. A no-op if nothing is active.
    ///
    /// Returns whether anything was active.
    pub fn stop(&self) -> bool {
        let stopped = self.lock().release();
        if stopped {
            info!(target: "session", "session stopped");
        }
        stopped
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_active()
    }

    fn lock(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
    }
}

/// Exclusive access to an idle session, see [`PlaybackSession::begin`].
pub struct Starting<'a> {
    session: &'a PlaybackSession,
    handles: MutexGuard<'a, Handles>,
}

impl Starting<'_> {
    /// # Errors
    /// if the audio output can't start
    pub fn play(&mut self, tone: &AlarmTone) -> Result<()> {
        let handle = self.session.audio.play_looping(tone)?;
        if let Some(mut old) = self.handles.audio.replace(handle) {
            old.stop();
        }
        debug!(target: "session", "audio started: {tone:?}");
        Ok(())
    }

    /// # Errors
    /// if there is no vibrator or it fails to start
    pub fn vibrate(&mut self, pattern: &VibrationPattern) -> Result<()> {
        if !self.session.vibrator.has_vibrator() {
            return Err(AlarmError::platform("vibrator", "device has no vibrator"));
        }
        let handle = self.session.vibrator.vibrate(pattern)?;
        if let Some(mut old) = self.handles.vibration.replace(handle) {
            old.cancel();
        }
        debug!(target: "session", "vibration started");
        Ok(())
    }
}
