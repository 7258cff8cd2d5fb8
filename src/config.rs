use std::{path::PathBuf, time::Duration};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, vibration::VibrationPattern};

const APPLICATION: &str = "rooster_alarm";
const MIN_WAKE_LOCK_SECS: u64 = 1;
const MAX_WAKE_LOCK_SECS: u64 = 10 * 60;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
    /// upper bound on how long a single fire keeps the device awake, 1 - 600
    #[serde(default = "default_wake_lock_secs")]
    pub wake_lock_secs: u64,
    /// off/on timings in milliseconds, starting with off
    #[serde(default = "default_vibration_pattern")]
    pub vibration_pattern: Vec<u64>,
    #[serde(default = "always_true")]
    pub has_vibrator: bool,
    /// 0 - 100
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "always_true")]
    pub exact_alarm_granted: bool,
    /// played when an alarm has no usable sound of its own, a beep is
    /// synthesized if this is unset
    #[serde(default)]
    pub default_tone: Option<PathBuf>,
    #[serde(default)]
    pub notifications: NotificationTexts,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationTexts {
    pub alarm_channel: String,
    pub alarm_title: String,
    pub keep_alive_channel: String,
    pub keep_alive_title: String,
    pub keep_alive_text: String,
}

impl Default for NotificationTexts {
    fn default() -> Self {
        Self {
            alarm_channel: "Rooster Alarm Alarms".to_string(),
            alarm_title: "Rooster Alarm".to_string(),
            keep_alive_channel: "Rooster Alarm Foreground".to_string(),
            keep_alive_title: "Rooster Alarm Active".to_string(),
            keep_alive_text: "Alarm system is running".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_name: default_socket_name(),
            wake_lock_secs: default_wake_lock_secs(),
            vibration_pattern: default_vibration_pattern(),
            has_vibrator: true,
            volume: default_volume(),
            exact_alarm_granted: true,
            default_tone: None,
            notifications: NotificationTexts::default(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// if the file can't be read or isn't a valid config
    pub fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let config =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
        Ok(toml::from_str(&config)?)
    }

    /// Loads the config at [`Self::config_path`], falling back to the
    /// defaults if there is none or it is broken.
    #[must_use]
    pub fn load_or_default() -> Self {
        match Self::config_path() {
            Ok(path) if path.exists() => Self::load(path).unwrap_or_else(|e| {
                warn!("{e}, using default config");
                Self::default()
            }),
            Ok(_) => Self::default(),
            Err(e) => {
                warn!("{e}, using default config");
                Self::default()
            }
        }
    }

    /// # Errors
    /// if the config can't be serialized or written
    pub fn save(&self, path: PathBuf) -> Result<(), ConfigError> {
        let config = toml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, config).map_err(|source| ConfigError::Write { path, source })
    }

    /// # Errors
    /// if there is no home directory to put the config in
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let mut path = directories::ProjectDirs::from("", "", APPLICATION)
            .ok_or(ConfigError::NoProjectDirs)?
            .config_dir()
            .to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    /// # Errors
    /// if there is no home directory to put sounds in
    pub fn sounds_path() -> Result<PathBuf, ConfigError> {
        let mut path = directories::ProjectDirs::from("", "", APPLICATION)
            .ok_or(ConfigError::NoProjectDirs)?
            .data_dir()
            .to_path_buf();
        path.push("sounds");
        Ok(path)
    }

    #[must_use]
    pub fn is_config_present() -> bool {
        Self::config_path().is_ok_and(|path| path.exists())
    }

    /// [`Self::wake_lock_secs`], clamped to 1 second through 10 minutes.
    #[must_use]
    pub fn wake_lock_timeout(&self) -> Duration {
        let secs = self
            .wake_lock_secs
            .clamp(MIN_WAKE_LOCK_SECS, MAX_WAKE_LOCK_SECS);
        if secs != self.wake_lock_secs {
            warn!(
                "wake lock timeout of {}s is out of range, using {secs}s",
                self.wake_lock_secs
            );
        }
        Duration::from_secs(secs)
    }

    /// The configured vibration, or the stock alarm pattern if the
    /// configured one never turns the motor on.
    #[must_use]
    pub fn vibration(&self) -> VibrationPattern {
        VibrationPattern::new(self.vibration_pattern.clone()).unwrap_or_else(|| {
            warn!("vibration pattern {:?} is empty, using the default", self.vibration_pattern);
            VibrationPattern::alarm()
        })
    }
}

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

fn default_socket_name() -> String {
    "rooster-alarmd.sock".to_string()
}

const fn default_wake_lock_secs() -> u64 {
    MAX_WAKE_LOCK_SECS
}

fn default_vibration_pattern() -> Vec<u64> {
    VibrationPattern::alarm().timings().to_vec()
}

const fn default_volume() -> f32 {
    100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::new();
        config.exact_alarm_granted = false;
        config.default_tone = Some(PathBuf::from("/usr/share/sounds/alarm.ogg"));
        config.save(path.clone()).unwrap();

        assert_eq!(Config::load(path).unwrap(), config);
    }

    #[test]
    fn missing_keys_use_defaults() {
        let config: Config = toml::from_str("volume = 40.0\n").unwrap();
        assert!((config.volume - 40.0).abs() < f32::EPSILON);
        assert_eq!(config.wake_lock_timeout(), Duration::from_secs(600));
        assert!(config.has_vibrator);
        assert!(config.exact_alarm_granted);
        assert_eq!(config.notifications, NotificationTexts::default());
    }

    #[test]
    fn bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "volume = \"loud\"").unwrap();
        assert!(matches!(Config::load(path), Err(ConfigError::Parse(_))));
        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn wake_lock_timeout_is_clamped() {
        let timeout = |wake_lock_secs| {
            Config {
                wake_lock_secs,
                ..Config::default()
            }
            .wake_lock_timeout()
        };
        assert_eq!(timeout(0), Duration::from_secs(1));
        assert_eq!(timeout(30), Duration::from_secs(30));
        assert_eq!(timeout(u64::MAX), Duration::from_secs(600));
    }

    #[test]
    fn silent_vibration_pattern_falls_back() {
        let config = Config {
            vibration_pattern: vec![500],
            ..Config::default()
        };
        assert_eq!(config.vibration(), VibrationPattern::alarm());
    }
}
