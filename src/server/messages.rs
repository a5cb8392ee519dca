//! Wire frames
//!
//! Inbound frames are parsed leniently: anything that is valid JSON but does
//! not match a known command shape is reported as an unknown format rather
//! than a parse error. Outbound frames are serialized with a leading `type`
//! tag followed by the fields in declaration order.

use crate::channels::Channel;
use crate::server::connections::{Frame, PeerRole};
use serde::Serialize;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Why an inbound frame was rejected. The `Display` text is what the client
/// sees in the `message` field of the error frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Unknown message format")]
    UnknownFormat,
}

/// A recognized client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Identify { role: PeerRole },
    Subscribe { channel: Channel },
    Unsubscribe { channel: Channel },
    Send { channel: Channel, message: String },
}

fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

fn channel_field(value: &Value) -> Option<Channel> {
    str_field(value, "channel").and_then(|name| Channel::parse(name).ok())
}

impl ClientCommand {
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(raw).map_err(FrameError::InvalidJson)?;

        let command = match str_field(&value, "type") {
            Some("identify") => str_field(&value, "role")
                .and_then(PeerRole::parse)
                .map(|role| ClientCommand::Identify { role }),
            Some("subscribe") => {
                channel_field(&value).map(|channel| ClientCommand::Subscribe { channel })
            }
            Some("unsubscribe") => {
                channel_field(&value).map(|channel| ClientCommand::Unsubscribe { channel })
            }
            Some("send") => channel_field(&value).zip(str_field(&value, "message")).map(
                |(channel, message)| ClientCommand::Send {
                    channel,
                    message: message.to_string(),
                },
            ),
            _ => None,
        };

        command.ok_or(FrameError::UnknownFormat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckAction {
    Identify,
    Subscribe,
    Unsubscribe,
    Send,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Delivered,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Command accepted
    Ack {
        action: AckAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<PeerRole>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        status: AckStatus,
    },
    /// Command rejected
    Error { message: String },
    /// Periodic liveness signal, unix time in milliseconds
    KeepAlive { timestamp: u64 },
}

impl ServerMessage {
    pub fn identified(role: PeerRole) -> Self {
        ServerMessage::Ack {
            action: AckAction::Identify,
            role: Some(role),
            channel: None,
            status: AckStatus::Ok,
        }
    }

    pub fn subscribed(channel: &Channel) -> Self {
        Self::channel_ack(AckAction::Subscribe, channel, AckStatus::Ok)
    }

    pub fn unsubscribed(channel: &Channel) -> Self {
        Self::channel_ack(AckAction::Unsubscribe, channel, AckStatus::Ok)
    }

    pub fn delivered(channel: &Channel) -> Self {
        Self::channel_ack(AckAction::Send, channel, AckStatus::Delivered)
    }

    fn channel_ack(action: AckAction, channel: &Channel, status: AckStatus) -> Self {
        ServerMessage::Ack {
            action,
            role: None,
            channel: Some(channel.to_string()),
            status,
        }
    }

    pub fn rejected(err: &FrameError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }

    pub fn keep_alive() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        ServerMessage::KeepAlive { timestamp }
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> serde_json::Result<Frame> {
        serde_json::to_string(self).map(Frame::from)
    }
}
