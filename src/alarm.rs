use std::{collections::BTreeMap, fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ACTION_TRIGGER: &str = "rooster_alarm.ALARM_TRIGGER";
pub const ACTION_STOP: &str = "rooster_alarm.STOP_ALARM";

pub const EXTRA_ALARM_ID: &str = "alarm_id";
pub const EXTRA_ALARM_MESSAGE: &str = "alarm_message";
pub const EXTRA_ALARM_TIME: &str = "alarm_time";
pub const EXTRA_CUSTOM_AUDIO: &str = "custom_audio_path";

pub const UNKNOWN_ALARM_ID: &str = "unknown";
pub const DEFAULT_MESSAGE: &str = "Time to wake up!";

/// Offset between an alarm's trigger slot and its stop action slot.
pub const STOP_ACTION_OFFSET: i32 = 1000;

/// a request from the host to ring at `trigger_at`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AlarmRequest {
    pub id: String,
    pub trigger_at: DateTime<Utc>,
    pub message: String,
    pub time_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<PathBuf>,
}

impl AlarmRequest {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        trigger_at: DateTime<Utc>,
        message: impl Into<String>,
        time_label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            trigger_at,
            message: message.into(),
            time_label: time_label.into(),
            audio: None,
        }
    }

    #[must_use]
    pub fn with_audio(mut self, audio: Option<PathBuf>) -> Self {
        // an empty path is the same as no custom sound
        self.audio = audio.filter(|path| !path.as_os_str().is_empty());
        self
    }

    #[must_use]
    pub fn request_code(&self) -> RequestCode {
        RequestCode::for_id(&self.id)
    }

    /// The payload the timer hands back verbatim when it fires.
    #[must_use]
    pub fn to_extras(&self) -> Extras {
        let mut extras = Extras::new();
        extras.insert(EXTRA_ALARM_ID.to_string(), self.id.clone());
        extras.insert(EXTRA_ALARM_MESSAGE.to_string(), self.message.clone());
        extras.insert(EXTRA_ALARM_TIME.to_string(), self.time_label.clone());
        if let Some(audio) = &self.audio {
            extras.insert(
                EXTRA_CUSTOM_AUDIO.to_string(),
                audio.to_string_lossy().into_owned(),
            );
        }
        extras
    }
}

pub type Extras = BTreeMap<String, String>;

/// What the timer subsystem delivers back on fire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FireIntent {
    pub action: String,
    pub extras: Extras,
}

impl FireIntent {
    #[must_use]
    pub fn trigger(request: &AlarmRequest) -> Self {
        Self {
            action: ACTION_TRIGGER.to_string(),
            extras: request.to_extras(),
        }
    }

    #[must_use]
    pub fn stop(id: &str) -> Self {
        let mut extras = Extras::new();
        extras.insert(EXTRA_ALARM_ID.to_string(), id.to_string());
        Self {
            action: ACTION_STOP.to_string(),
            extras,
        }
    }

    #[must_use]
    pub fn alarm_id(&self) -> Option<&str> {
        self.extras.get(EXTRA_ALARM_ID).map(String::as_str)
    }
}

/// per fire record handed to the notification, the session and the host
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TriggerContext {
    pub id: String,
    pub message: String,
    pub time_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<PathBuf>,
}

impl TriggerContext {
    /// Rebuilds the context from fired extras, filling in defaults for
    /// anything the timer lost.
    #[must_use]
    pub fn from_extras(extras: &Extras) -> Self {
        Self {
            id: extras
                .get(EXTRA_ALARM_ID)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_ALARM_ID.to_string()),
            message: extras
                .get(EXTRA_ALARM_MESSAGE)
                .cloned()
                .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            time_label: extras.get(EXTRA_ALARM_TIME).cloned().unwrap_or_default(),
            audio: extras
                .get(EXTRA_CUSTOM_AUDIO)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Platform timer slot for an alarm id.
///
/// The slot is the Java `String.hashCode` of the id: `h = 31 * h + u` over
/// the UTF-16 code units, wrapping at 32 bits. Ids with equal hashes share a
/// slot, e.g. `"Aa"` and `"BB"`, and the later schedule replaces the earlier.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestCode(pub i32);

impl RequestCode {
    #[must_use]
    pub fn for_id(id: &str) -> Self {
        Self(
            id.encode_utf16()
                .fold(0_i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit))),
        )
    }

    /// slot of the stop action belonging to this alarm
    #[must_use]
    pub const fn stop_action(self) -> Self {
        Self(self.0.wrapping_add(STOP_ACTION_OFFSET))
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
