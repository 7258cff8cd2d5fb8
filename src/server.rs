//! The daemon side of the socket, and the client the CLI uses to reach it.

use std::{
    io::{self, BufReader, Write},
    sync::Arc,
    thread,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use interprocess::local_socket::{
    prelude::*, GenericFilePath, GenericNamespaced, ListenerOptions, Name, RecvHalf, SendHalf,
    Stream,
};
use log::{debug, error, info, warn};

use crate::{
    alarm::{FireIntent, TriggerContext},
    audio::{RodioOutput, SilentOutput},
    communication::{self, ClientMessage, PostedNotification, ServerMessage},
    config::Config,
    dispatch::DispatchSettings,
    error::{ProtocolError, Result},
    keep_alive::DaemonResidency,
    notification::NotificationShade,
    platform::AudioOutput,
    service::{AlarmService, Platform},
    timer::ThreadTimer,
    vibration::{LogMotor, PatternVibrator},
    wake::ProcessWakeLocks,
};

/// The alarm service plus the desktop stand-ins for everything a phone
/// would provide.
pub struct Daemon {
    service: AlarmService,
    timer: Arc<ThreadTimer>,
    shade: Arc<NotificationShade>,
    residency: Arc<DaemonResidency>,
    restore_requested: bool,
}

impl Daemon {
    /// Builds the daemon. Intents from the timer come out of the returned
    /// receiver and should be handed to [`Self::serve`].
    ///
    /// # Errors
    /// if the timer thread can't be started
    pub fn new(
        config: &Config,
        audio: Arc<dyn AudioOutput>,
        restore_requested: bool,
    ) -> Result<(Self, Receiver<FireIntent>)> {
        let (timer, fired) = ThreadTimer::spawn(config.exact_alarm_granted)?;
        let timer = Arc::new(timer);
        let shade = Arc::new(NotificationShade::new());
        let residency = Arc::new(DaemonResidency::new());
        let service = AlarmService::new(
            Platform {
                timer: timer.clone(),
                wake: Arc::new(ProcessWakeLocks::new()),
                notifier: shade.clone(),
                audio,
                vibrator: Arc::new(PatternVibrator::new(Arc::new(LogMotor), config.has_vibrator)),
                residency: residency.clone(),
            },
            DispatchSettings::from(config),
        );
        Ok((
            Self {
                service,
                timer,
                shade,
                residency,
                restore_requested,
            },
            fired,
        ))
    }

    /// The default output device, or silence if there isn't one.
    #[must_use]
    pub fn open_audio(config: &Config) -> Arc<dyn AudioOutput> {
        match RodioOutput::open(config.volume, config.default_tone.clone()) {
            Ok(output) => Arc::new(output),
            Err(e) => {
                warn!(target: "server", "{e}, alarms will be silent");
                Arc::new(SilentOutput)
            }
        }
    }

    #[must_use]
    pub const fn service(&self) -> &AlarmService {
        &self.service
    }

    /// Answers a single request. [`ClientMessage::Subscribe`] only gets its
    /// acknowledgement here, the streaming happens on the connection.
    pub fn handle(&self, message: ClientMessage) -> ServerMessage {
        debug!(target: "server", "handling {message:?}");
        match message {
            ClientMessage::Initialize => {
                self.service.initialize();
                ServerMessage::Initialized {
                    restore_requested: self.restore_requested,
                }
            }
            ClientMessage::Schedule(request) => {
                ServerMessage::Done(self.service.schedule(&request))
            }
            ClientMessage::Cancel(id) => ServerMessage::Done(self.service.cancel(&id)),
            ClientMessage::CancelAll => ServerMessage::Done(self.service.cancel_all()),
            ClientMessage::IsScheduled(id) => ServerMessage::Done(self.service.is_scheduled(&id)),
            ClientMessage::Stop(id) => ServerMessage::Done(self.service.stop(&id)),
            ClientMessage::CheckPendingAlarm => self
                .service
                .check_pending_alarm()
                .map_or(ServerMessage::NoPendingAlarm, ServerMessage::PendingAlarm),
            ClientMessage::RequestExactAlarmPermission => {
                ServerMessage::Done(self.service.request_exact_alarm_permission())
            }
            ClientMessage::GrantExactAlarmPermission(granted) => {
                self.timer.grant_exact(granted);
                ServerMessage::Done(true)
            }
            ClientMessage::Notifications => ServerMessage::Notifications(
                self.shade
                    .posted()
                    .into_iter()
                    .map(|(slot, notification)| PostedNotification { slot, notification })
                    .collect(),
            ),
            ClientMessage::PressAction { slot, label } => {
                if let Some(intent) = self.shade.press(slot, &label) {
                    let outcome = self.service.fire(intent);
                    debug!(target: "server", "pressed {label}: {outcome:?}");
                    ServerMessage::Done(true)
                } else {
                    ServerMessage::Done(false)
                }
            }
            ClientMessage::Subscribe => ServerMessage::Subscribed,
            ClientMessage::Shutdown { force } => {
                if self.residency.is_held() && !force {
                    info!(target: "server", "refusing to shut down while keep alive is held");
                    ServerMessage::ShuttingDown(false)
                } else {
                    self.service.shutdown();
                    ServerMessage::ShuttingDown(true)
                }
            }
        }
    }

    /// Runs until a client shuts the daemon down.
    ///
    /// # Errors
    /// if the socket can't be bound or a thread can't be spawned
    pub fn serve(
        self: Arc<Self>,
        fired: Receiver<FireIntent>,
        socket_name: &str,
    ) -> io::Result<()> {
        let daemon = Arc::clone(&self);
        thread::Builder::new()
            .name("fire-loop".to_string())
            .spawn(move || {
                for intent in fired {
                    daemon.service.spawn_fire(intent);
                }
            })?;

        let name = socket(socket_name)?;
        let listener = match ListenerOptions::new().name(name).create_sync() {
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                error!(
                    target: "server",
                    "could not start server because the socket file is occupied, check if {socket_name} is in use by another process"
                );
                return Err(e);
            }
            x => x?,
        };
        info!(target: "server", "server running at {socket_name}");

        let (shutdown, shutdown_requested) = bounded(1);
        thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || {
                for conn in listener.incoming().filter_map(handle_error) {
                    let daemon = Arc::clone(&self);
                    let shutdown = shutdown.clone();
                    if let Err(e) = thread::Builder::new()
                        .name("connection".to_string())
                        .spawn(move || daemon.converse(conn, &shutdown))
                    {
                        error!(target: "server", "couldn't spawn connection thread: {e}");
                    }
                }
            })?;

        let _ = shutdown_requested.recv();
        info!(target: "server", "shutting down");
        Ok(())
    }

    fn converse(&self, conn: Stream, shutdown: &Sender<()>) {
        let (recv, mut send) = conn.split();
        let mut recv = BufReader::new(recv);
        debug!(target: "server", "incoming connection");
        loop {
            let message = match communication::receive::<ClientMessage>(&mut recv) {
                Ok(message) => message,
                Err(ProtocolError::Closed) => {
                    debug!(target: "server", "connection closed");
                    return;
                }
                Err(e) => {
                    warn!(target: "server", "bad request: {e}");
                    let _ = communication::send(&mut send, &ServerMessage::Error(e.to_string()));
                    return;
                }
            };
            let subscribing = message == ClientMessage::Subscribe;
            let reply = self.handle(message);
            if let Err(e) = communication::send(&mut send, &reply) {
                warn!(target: "server", "couldn't reply: {e}");
                return;
            }
            if reply == ServerMessage::ShuttingDown(true) {
                let _ = shutdown.try_send(());
                return;
            }
            if subscribing {
                self.stream_alarms(&mut send);
                return;
            }
        }
    }

    /// Forwards fired alarms until the subscriber goes away or another one
    /// replaces it.
    fn stream_alarms(&self, send: &mut impl Write) {
        for context in self.service.attach_host() {
            if let Err(e) =
                communication::send(send, &ServerMessage::AlarmTriggered(context.clone()))
            {
                warn!(target: "server", "lost subscriber: {e}");
                self.service.return_undelivered(context);
                return;
            }
        }
        debug!(target: "server", "subscriber replaced");
    }
}

fn handle_error(conn: io::Result<Stream>) -> Option<Stream> {
    match conn {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(target: "server", "incoming connection failed: {e}");
            None
        }
    }
}

fn socket(name: &str) -> io::Result<Name<'_>> {
    if GenericNamespaced::is_supported() {
        name.to_ns_name::<GenericNamespaced>()
    } else {
        std::env::temp_dir()
            .join(name)
            .to_fs_name::<GenericFilePath>()
    }
}

/// A connection to the daemon.
pub struct Client {
    recv: BufReader<RecvHalf>,
    send: SendHalf,
}

impl Client {
    /// # Errors
    /// if the daemon isn't running
    pub fn connect(socket_name: &str) -> io::Result<Self> {
        let (recv, send) = Stream::connect(socket(socket_name)?)?.split();
        Ok(Self {
            recv: BufReader::new(recv),
            send,
        })
    }

    /// # Errors
    /// if the daemon can't be reached or answers with nonsense
    pub fn request(&mut self, message: &ClientMessage) -> Result<ServerMessage, ProtocolError> {
        communication::request(&mut self.recv, &mut self.send, message)
    }

    /// Subscribes and returns the alarms as they fire. Ends when the
    /// daemon hangs up.
    ///
    /// # Errors
    /// if the subscription isn't acknowledged
    pub fn subscribe(
        mut self,
    ) -> Result<impl Iterator<Item = Result<TriggerContext, ProtocolError>>, ProtocolError> {
        match self.request(&ClientMessage::Subscribe)? {
            ServerMessage::Subscribed => {}
            other => return Err(ProtocolError::Unexpected(format!("{other:?}"))),
        }
        Ok(std::iter::from_fn(move || {
            match communication::receive::<ServerMessage>(&mut self.recv) {
                Ok(ServerMessage::AlarmTriggered(context)) => Some(Ok(context)),
                Ok(other) => Some(Err(ProtocolError::Unexpected(format!("{other:?}")))),
                Err(ProtocolError::Closed) => None,
                Err(e) => Some(Err(e)),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::{
        alarm::AlarmRequest,
        notification::{ALARM_SLOT, KEEP_ALIVE_SLOT, STOP_ACTION_LABEL},
    };

    fn daemon(restore_requested: bool) -> (Daemon, Receiver<FireIntent>) {
        Daemon::new(
            &Config::default(),
            Arc::new(SilentOutput),
            restore_requested,
        )
        .unwrap()
    }

    #[test]
    fn initialize_reports_restore() {
        let (daemon, _fired) = daemon(true);
        assert_eq!(
            daemon.handle(ClientMessage::Initialize),
            ServerMessage::Initialized {
                restore_requested: true
            }
        );
        let ServerMessage::Notifications(posted) = daemon.handle(ClientMessage::Notifications)
        else {
            panic!("expected notifications");
        };
        assert!(posted.iter().any(|posted| posted.slot == KEEP_ALIVE_SLOT));
    }

    #[test]
    fn shutdown_needs_force_while_resident() {
        let (daemon, _fired) = daemon(false);
        daemon.handle(ClientMessage::Initialize);
        assert_eq!(
            daemon.handle(ClientMessage::Shutdown { force: false }),
            ServerMessage::ShuttingDown(false)
        );
        assert_eq!(
            daemon.handle(ClientMessage::Shutdown { force: true }),
            ServerMessage::ShuttingDown(true)
        );
        assert!(!daemon.residency.is_held());
    }

    #[test]
    fn fired_alarm_can_be_stopped_from_the_shade() {
        let (daemon, fired) = daemon(false);
        let request = AlarmRequest::new(
            "morning",
            Utc::now() - TimeDelta::seconds(1),
            "Wake up",
            "07:00",
        );
        assert_eq!(
            daemon.handle(ClientMessage::Schedule(request)),
            ServerMessage::Done(true)
        );
        let intent = fired.recv_timeout(Duration::from_secs(5)).unwrap();
        daemon.service().fire(intent);
        assert!(daemon.service().is_active());

        assert_eq!(
            daemon.handle(ClientMessage::PressAction {
                slot: ALARM_SLOT,
                label: STOP_ACTION_LABEL.to_string(),
            }),
            ServerMessage::Done(true)
        );
        assert!(!daemon.service().is_active());
        assert!(daemon.shade.get(ALARM_SLOT).is_none());
        assert_eq!(
            daemon.handle(ClientMessage::PressAction {
                slot: ALARM_SLOT,
                label: STOP_ACTION_LABEL.to_string(),
            }),
            ServerMessage::Done(false)
        );

        let ServerMessage::PendingAlarm(context) = daemon.handle(ClientMessage::CheckPendingAlarm)
        else {
            panic!("expected the missed alarm to be pending");
        };
        assert_eq!(context.id, "morning");
        assert_eq!(
            daemon.handle(ClientMessage::CheckPendingAlarm),
            ServerMessage::NoPendingAlarm
        );
    }

    #[test]
    fn granting_permission_unblocks_scheduling() {
        let config = Config {
            exact_alarm_granted: false,
            ..Config::default()
        };
        let (daemon, _fired) = Daemon::new(&config, Arc::new(SilentOutput), false).unwrap();
        let request = AlarmRequest::new("a", Utc::now() + TimeDelta::days(1), "m", "t");
        assert_eq!(
            daemon.handle(ClientMessage::Schedule(request.clone())),
            ServerMessage::Done(false)
        );
        daemon.handle(ClientMessage::GrantExactAlarmPermission(true));
        assert_eq!(
            daemon.handle(ClientMessage::RequestExactAlarmPermission),
            ServerMessage::Done(true)
        );
        assert_eq!(
            daemon.handle(ClientMessage::Schedule(request)),
            ServerMessage::Done(true)
        );
        assert_eq!(
            daemon.handle(ClientMessage::IsScheduled("a".to_string())),
            ServerMessage::Done(true)
        );
    }

    #[test]
    fn broken_subscriber_puts_the_alarm_back() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let (daemon, _fired) = daemon(false);
        let daemon = Arc::new(daemon);
        let streaming = Arc::clone(&daemon);
        let subscriber = thread::spawn(move || streaming.stream_alarms(&mut Broken));
        let request = AlarmRequest::new("a", Utc::now(), "m", "t");
        // the subscriber only returns once a live delivery has failed
        for _ in 0..250 {
            daemon.service().fire(FireIntent::trigger(&request));
            thread::sleep(Duration::from_millis(20));
            if subscriber.is_finished() {
                break;
            }
        }
        assert!(subscriber.is_finished());
        let pending = daemon.service().check_pending_alarm().unwrap();
        assert_eq!(pending.id, "a");
        daemon.service().stop("a");
    }
}
