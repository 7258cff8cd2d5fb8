use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};

use crate::alarm::TriggerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// a listening host got it
    Live,
    /// nobody was listening, it waits for the next readiness probe
    Buffered,
}

#[derive(Default)]
struct State {
    listener: Option<Sender<TriggerContext>>,
    pending: Option<TriggerContext>,
}

/// Carries fired alarms to the host. When the host isn't listening the
/// latest context is kept, older undelivered ones are dropped.
#[derive(Default)]
pub struct HostHandoff {
    state: Mutex<State>,
}

impl HostHandoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts listening, replacing any previous listener.
    pub fn attach(&self) -> Receiver<TriggerContext> {
        let (sender, receiver) = unbounded();
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listener = Some(sender);
        info!(target: "handoff", "host attached");
        receiver
    }

    pub fn deliver(&self, context: TriggerContext) -> Delivery {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(listener) = state.listener.as_ref() else {
            return Self::hold(&mut state, context);
        };
        match listener.send(context) {
            Ok(()) => {
                debug!(target: "handoff", "delivered to listening host");
                Delivery::Live
            }
            Err(failed) => {
                info!(target: "handoff", "host stopped listening");
                state.listener = None;
                Self::hold(&mut state, failed.into_inner())
            }
        }
    }

    /// Puts back a context a listener received but couldn't pass on.
    pub fn buffer(&self, context: TriggerContext) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Self::hold(&mut state, context);
    }

    /// The readiness probe: hands out the pending context once.
    pub fn take_pending(&self) -> Option<TriggerContext> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .take()
    }

    fn hold(state: &mut State, context: TriggerContext) -> Delivery {
        if let Some(overwritten) = state.pending.replace(context) {
            debug!(target: "handoff", "dropping undelivered alarm {}", overwritten.id);
        }
        Delivery::Buffered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(id: &str) -> TriggerContext {
        TriggerContext {
            id: id.to_string(),
            message: "Wake up".to_string(),
            time_label: "07:00".to_string(),
            audio: None,
        }
    }

    #[test]
    fn buffers_without_listener() {
        let handoff = HostHandoff::new();
        assert_eq!(handoff.deliver(context("a")), Delivery::Buffered);
        assert_eq!(handoff.take_pending(), Some(context("a")));
        assert_eq!(handoff.take_pending(), None);
    }

    #[test]
    fn only_latest_is_kept() {
        let handoff = HostHandoff::new();
        handoff.deliver(context("a"));
        handoff.deliver(context("b"));
        assert_eq!(handoff.take_pending(), Some(context("b")));
        assert_eq!(handoff.take_pending(), None);
    }

    #[test]
    fn live_listener_gets_it_directly() {
        let handoff = HostHandoff::new();
        let listener = handoff.attach();
        assert_eq!(handoff.deliver(context("a")), Delivery::Live);
        assert_eq!(listener.try_recv().unwrap(), context("a"));
        assert_eq!(handoff.take_pending(), None);
    }

    #[test]
    fn gone_listener_falls_back_to_buffer() {
        let handoff = HostHandoff::new();
        drop(handoff.attach());
        assert_eq!(handoff.deliver(context("a")), Delivery::Buffered);
        assert_eq!(handoff.take_pending(), Some(context("a")));
    }

    #[test]
    fn rebuffered_context_is_pending() {
        let handoff = HostHandoff::new();
        handoff.buffer(context("a"));
        assert_eq!(handoff.take_pending(), Some(context("a")));
    }
}
