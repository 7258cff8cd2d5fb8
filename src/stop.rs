use std::sync::Arc;

use log::{info, warn};

use crate::{notification::ALARM_SLOT, platform::Notifier, session::PlaybackSession};

/// Silences whatever is ringing and takes its notification down.
///
/// The notification's stop action, the host and `cancel_all` all come
/// through here. The session is global, so the id only shows up in logs:
/// stopping `"a"` after `"b"` superseded it silences `"b"`.
pub struct StopCommand {
    session: Arc<PlaybackSession>,
    notifier: Arc<dyn Notifier>,
}

impl StopCommand {
    #[must_use]
    pub fn new(session: Arc<PlaybackSession>, notifier: Arc<dyn Notifier>) -> Self {
        Self { session, notifier }
    }

    /// Returns whether anything was ringing.
    pub fn stop(&self, id: &str) -> bool {
        info!(target: "stop", "stopping alarm {id}");
        let was_active = self.session.stop();
        if let Err(e) = self.notifier.cancel(ALARM_SLOT) {
            warn!(target: "stop", "couldn't retract notification for {id}: {e}");
        }
        was_active
    }
}
