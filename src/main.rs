#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions)]

use std::{error::Error, path::PathBuf, sync::Arc};

use chrono::{DateTime, Local, NaiveTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use rooster_alarm::{
    alarm::{AlarmRequest, TriggerContext, DEFAULT_MESSAGE},
    communication::{ClientMessage, ServerMessage},
    config::Config,
    notification::{ALARM_SLOT, STOP_ACTION_LABEL},
    server::{Client, Daemon},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the alarm daemon
    Daemon {
        /// started after a reboot, tell the host to schedule its alarms again
        #[clap(long)]
        restore: bool,
    },
    /// Write the default config
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// Start the keep alive signal, as a host does on launch
    Initialize,
    Schedule {
        id: String,
        /// RFC 3339, milliseconds since the epoch, or HH:MM for the next
        /// time the clock shows it
        at: String,
        #[clap(long, short, default_value = DEFAULT_MESSAGE)]
        message: String,
        /// shown on the notification, defaults to the local time of `at`
        #[clap(long, short)]
        label: Option<String>,
        /// a sound file, relative paths are also looked up in the sounds
        /// directory
        #[clap(long, short)]
        audio: Option<PathBuf>,
    },
    Cancel {
        id: String,
    },
    CancelAll,
    IsScheduled {
        id: String,
    },
    Stop {
        id: String,
    },
    /// Fetch the last alarm that fired while nobody was listening
    CheckPending,
    RequestPermission,
    /// Grant (or with --revoke, take away) the exact alarm permission
    GrantPermission {
        #[clap(long)]
        revoke: bool,
    },
    /// Show what is in the notification shade
    Notifications,
    /// Press an action on the alarm notification
    Press {
        #[clap(default_value = STOP_ACTION_LABEL)]
        label: String,
    },
    /// Print alarms as they fire
    Listen,
    Shutdown {
        /// even while the keep alive signal is running
        #[clap(long, short)]
        force: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    if let Err(e) = simple_file_logger::init_logger!("rooster_alarm") {
        eprintln!("couldn't initialize logger: {e:?}");
    }

    let args = Args::parse();
    let config = Config::load_or_default();
    let message = match args.command {
        Command::Daemon { restore } => {
            let (daemon, fired) = Daemon::new(&config, Daemon::open_audio(&config), restore)?;
            Arc::new(daemon).serve(fired, &config.socket_name)?;
            return Ok(());
        }
        Command::Init { force } => {
            if force || !Config::is_config_present() {
                let path = Config::config_path()?;
                Config::new().save(path.clone())?;
                std::fs::create_dir_all(Config::sounds_path()?)?;
                println!("wrote {}", path.display());
            } else {
                println!("config already exists, use --force to overwrite it");
            }
            return Ok(());
        }
        Command::Listen => return listen(&config),
        Command::Initialize => ClientMessage::Initialize,
        Command::Schedule {
            id,
            at,
            message,
            label,
            audio,
        } => {
            let trigger_at = parse_instant(&at)?;
            let label = label.unwrap_or_else(|| {
                trigger_at
                    .with_timezone(&Local)
                    .format("%H:%M")
                    .to_string()
            });
            ClientMessage::Schedule(
                AlarmRequest::new(id, trigger_at, message, label)
                    .with_audio(audio.map(find_sound)),
            )
        }
        Command::Cancel { id } => ClientMessage::Cancel(id),
        Command::CancelAll => ClientMessage::CancelAll,
        Command::IsScheduled { id } => ClientMessage::IsScheduled(id),
        Command::Stop { id } => ClientMessage::Stop(id),
        Command::CheckPending => ClientMessage::CheckPendingAlarm,
        Command::RequestPermission => ClientMessage::RequestExactAlarmPermission,
        Command::GrantPermission { revoke } => ClientMessage::GrantExactAlarmPermission(!revoke),
        Command::Notifications => ClientMessage::Notifications,
        Command::Press { label } => ClientMessage::PressAction {
            slot: ALARM_SLOT,
            label,
        },
        Command::Shutdown { force } => ClientMessage::Shutdown { force },
    };

    let mut client = Client::connect(&config.socket_name)?;
    print_reply(client.request(&message)?)
}

fn listen(config: &Config) -> Result<(), Box<dyn Error>> {
    let mut client = Client::connect(&config.socket_name)?;
    if let ServerMessage::PendingAlarm(context) =
        client.request(&ClientMessage::CheckPendingAlarm)?
    {
        print_alarm(&context);
    }
    for context in client.subscribe()? {
        print_alarm(&context?);
    }
    Ok(())
}

fn print_reply(reply: ServerMessage) -> Result<(), Box<dyn Error>> {
    match reply {
        ServerMessage::Done(done) => println!("{done}"),
        ServerMessage::Initialized { restore_requested } => {
            println!("initialized");
            if restore_requested {
                println!("daemon was restored, schedule your alarms again");
            }
        }
        ServerMessage::PendingAlarm(context) => print_alarm(&context),
        ServerMessage::NoPendingAlarm => println!("no pending alarm"),
        ServerMessage::Notifications(posted) => {
            for posted in posted {
                let notification = posted.notification;
                println!(
                    "[{}] {}: {}",
                    posted.slot.0, notification.title, notification.text
                );
                if let Some(subtext) = notification.subtext {
                    println!("    {subtext}");
                }
                for action in notification.actions {
                    println!("    ({})", action.label);
                }
            }
        }
        ServerMessage::ShuttingDown(true) => println!("daemon shutting down"),
        ServerMessage::ShuttingDown(false) => {
            println!("daemon is being kept alive, use --force to stop it anyway");
        }
        ServerMessage::Error(e) => return Err(e.into()),
        other => println!("{other:?}"),
    }
    Ok(())
}

fn print_alarm(context: &TriggerContext) {
    println!("{} ({}): {}", context.id, context.time_label, context.message);
}

fn find_sound(path: PathBuf) -> PathBuf {
    if path.is_relative() && !path.exists() {
        if let Ok(sounds) = Config::sounds_path() {
            let candidate = sounds.join(&path);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    path
}

fn parse_instant(at: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(at) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(millis) = at.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| format!("{millis} is out of range"));
    }
    let time = NaiveTime::parse_from_str(at, "%H:%M")
        .map_err(|_| format!("couldn't understand `{at}` as a time"))?;
    next_occurrence(Local::now(), time).ok_or_else(|| format!("{at} doesn't exist today"))
}

fn next_occurrence(now: DateTime<Local>, time: NaiveTime) -> Option<DateTime<Utc>> {
    let today = now
        .date_naive()
        .and_time(time)
        .and_local_timezone(Local)
        .earliest()?;
    let next = if today <= now {
        today + TimeDelta::days(1)
    } else {
        today
    };
    Some(next.with_timezone(&Utc))
}
