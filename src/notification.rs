use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{FireIntent, RequestCode, TriggerContext},
    config::NotificationTexts,
    error::Result,
    platform::Notifier,
    vibration::VibrationPattern,
};

pub const STOP_ACTION_LABEL: &str = "STOP ALARM";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationSlot(pub i32);

/// where the ringing alarm is shown, shared by every alarm
pub const ALARM_SLOT: NotificationSlot = NotificationSlot(1001);
/// where the keep alive notice is shown
pub const KEEP_ALIVE_SLOT: NotificationSlot = NotificationSlot(1002);

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Alarm,
    Service,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub label: String,
    pub request_code: RequestCode,
    pub intent: FireIntent,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtext: Option<String>,
    pub priority: Priority,
    pub category: Category,
    /// ongoing notifications can't be swiped away
    pub ongoing: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vibrate: Vec<u64>,
    /// what opening the notification hands to the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TriggerContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    #[must_use]
    pub fn alarm(
        context: &TriggerContext,
        pattern: &VibrationPattern,
        texts: &NotificationTexts,
    ) -> Self {
        let code = RequestCode::for_id(&context.id);
        Self {
            channel: texts.alarm_channel.clone(),
            title: texts.alarm_title.clone(),
            text: context.message.clone(),
            subtext: Some(format!("Scheduled for: {}", context.time_label)),
            priority: Priority::High,
            category: Category::Alarm,
            ongoing: true,
            vibrate: pattern.timings().to_vec(),
            content: Some(context.clone()),
            actions: vec![NotificationAction {
                label: STOP_ACTION_LABEL.to_string(),
                request_code: code.stop_action(),
                intent: FireIntent::stop(&context.id),
            }],
        }
    }

    #[must_use]
    pub fn keep_alive(texts: &NotificationTexts) -> Self {
        Self {
            channel: texts.keep_alive_channel.clone(),
            title: texts.keep_alive_title.clone(),
            text: texts.keep_alive_text.clone(),
            subtext: None,
            priority: Priority::Low,
            category: Category::Service,
            ongoing: true,
            vibrate: Vec::new(),
            content: None,
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn action(&self, label: &str) -> Option<&NotificationAction> {
        self.actions.iter().find(|action| action.label == label)
    }
}

/// The daemon's notification shade. Hosts read it over the socket and
/// render it however they like.
#[derive(Debug, Default)]
pub struct NotificationShade {
    posted: Mutex<BTreeMap<NotificationSlot, Notification>>,
}

impl NotificationShade {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, slot: NotificationSlot) -> Option<Notification> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&slot)
            .cloned()
    }

    #[must_use]
    pub fn posted(&self) -> Vec<(NotificationSlot, Notification)> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(slot, notification)| (*slot, notification.clone()))
            .collect()
    }

    /// The intent behind the action labelled `label` in `slot`, as if the
    /// user had pressed it.
    #[must_use]
    pub fn press(&self, slot: NotificationSlot, label: &str) -> Option<FireIntent> {
        self.get(slot)
            .and_then(|notification| notification.action(label).map(|a| a.intent.clone()))
    }
}

impl Notifier for NotificationShade {
    fn post(&self, slot: NotificationSlot, notification: Notification) -> Result<()> {
        debug!(target: "notification", "posting {} to slot {}", notification.title, slot.0);
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot, notification);
        Ok(())
    }

    fn cancel(&self, slot: NotificationSlot) -> Result<()> {
        if self
            .posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot)
            .is_some()
        {
            debug!(target: "notification", "retracted slot {}", slot.0);
        }
        Ok(())
    }
}
