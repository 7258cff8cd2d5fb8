#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! An alarm that keeps ringing until somebody stops it.
//!
//! [`service::AlarmService`] is what a host talks to: it schedules alarms
//! with a timer, and when one fires it wakes the device, posts a
//! notification with a stop action, loops a tone, vibrates and hands the
//! alarm to the host. Everything it needs from the operating system goes
//! through the traits in [`platform`]; [`server::Daemon`] wires up desktop
//! implementations and serves the service over a local socket.

pub mod alarm;
pub mod audio;
pub mod communication;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handoff;
pub mod keep_alive;
pub mod notification;
pub mod platform;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod session;
pub mod stop;
pub mod timer;
pub mod vibration;
pub mod wake;

pub use alarm::{AlarmRequest, TriggerContext};
pub use config::Config;
pub use error::AlarmError;
pub use service::AlarmService;
