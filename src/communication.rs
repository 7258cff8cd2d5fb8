//! The daemon's wire protocol.
//!
//! Every message is a single line: base64 of a toml document with one key,
//! `message`, holding a [`ClientMessage`] or [`ServerMessage`].

use std::io::{BufRead, Write};

use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    alarm::{AlarmRequest, TriggerContext},
    error::ProtocolError,
    notification::{Notification, NotificationSlot},
};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Initialize,
    Schedule(AlarmRequest),
    Cancel(String),
    CancelAll,
    IsScheduled(String),
    Stop(String),
    CheckPendingAlarm,
    RequestExactAlarmPermission,
    /// Stands in for the user flipping the exact alarm switch.
    GrantExactAlarmPermission(bool),
    Notifications,
    /// Presses the action labelled `label` on the notification in `slot`.
    PressAction { slot: NotificationSlot, label: String },
    /// Keeps the connection open and streams [`ServerMessage::AlarmTriggered`].
    Subscribe,
    Shutdown { force: bool },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Initialized { restore_requested: bool },
    Done(bool),
    PendingAlarm(TriggerContext),
    NoPendingAlarm,
    Notifications(Vec<PostedNotification>),
    Subscribed,
    AlarmTriggered(TriggerContext),
    ShuttingDown(bool),
    Error(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PostedNotification {
    pub slot: NotificationSlot,
    pub notification: Notification,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    message: T,
}

/// Writes `message` as one line and flushes.
///
/// # Errors
/// If `message` can't be serialized or the write fails.
pub fn send<T: Serialize>(conn: &mut impl Write, message: &T) -> Result<(), ProtocolError> {
    let toml = toml::to_string(&Envelope { message })?;
    writeln!(
        conn,
        "{}",
        base64::prelude::BASE64_STANDARD.encode(toml.as_bytes())
    )?;
    conn.flush()?;
    Ok(())
}

/// Reads one line and decodes it.
///
/// # Errors
/// [`ProtocolError::Closed`] if the other end hung up, otherwise whatever
/// went wrong decoding the line.
pub fn receive<T: DeserializeOwned>(conn: &mut impl BufRead) -> Result<T, ProtocolError> {
    let mut line = String::new();
    if conn.read_line(&mut line)? == 0 {
        return Err(ProtocolError::Closed);
    }
    let bytes = base64::prelude::BASE64_STANDARD.decode(line.trim_end())?;
    let toml = String::from_utf8(bytes)?;
    let envelope: Envelope<T> = toml::from_str(&toml)?;
    Ok(envelope.message)
}

/// Sends `message` and waits for the reply.
///
/// # Errors
/// See [`send`] and [`receive`].
pub fn request(
    recv: &mut impl BufRead,
    send_half: &mut impl Write,
    message: &ClientMessage,
) -> Result<ServerMessage, ProtocolError> {
    send(send_half, message)?;
    receive(recv)
}
