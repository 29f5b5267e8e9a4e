//! The JSON envelope carried by every RPC message.
//!
//! Outbound requests carry `args`, inbound replies and dispatches carry
//! `data`. The `nonce` correlates a reply with its request; dispatches from
//! the application have no nonce.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RPC command names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
	/// Unsolicited event delivery from the application.
	Dispatch,
	Authorize,
	Authenticate,
	GetGuild,
	GetGuilds,
	GetChannel,
	GetChannels,
	CreateChannelInvite,
	GetRelationships,
	GetUser,
	Subscribe,
	Unsubscribe,
	SetUserVoiceSettings,
	SelectVoiceChannel,
	GetSelectedVoiceChannel,
	SelectTextChannel,
	GetVoiceSettings,
	SetVoiceSettings,
	CaptureShortcut,
	SetCertifiedDevices,
	SetActivity,
	SendActivityJoinInvite,
	CloseActivityRequest,
	/// Command name this version does not know about.
	#[serde(other)]
	Unknown,
}

/// RPC event names, used both for subscriptions and for dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
	/// Handshake dispatch sent right after the transport opens.
	Ready,
	/// Marks a reply (or dispatch) as a failure.
	Error,
	GuildStatus,
	GuildCreate,
	ChannelCreate,
	RelationshipUpdate,
	VoiceChannelSelect,
	VoiceStateCreate,
	VoiceStateDelete,
	VoiceStateUpdate,
	VoiceSettingsUpdate,
	VoiceConnectionStatus,
	SpeakingStart,
	SpeakingStop,
	MessageCreate,
	MessageUpdate,
	MessageDelete,
	NotificationCreate,
	CaptureShortcutChange,
	ActivityJoin,
	ActivitySpectate,
	ActivityJoinRequest,
	ActivityInvite,
	/// Event name this version does not know about.
	#[serde(other)]
	Unknown,
}

/// A single RPC message in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub cmd: Command,
	#[serde(default)]
	pub evt: Option<EventKind>,
	#[serde(default)]
	pub nonce: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub args: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl Envelope {
	/// Builds an outbound request envelope.
	pub fn request(cmd: Command, args: Value, evt: Option<EventKind>, nonce: impl Into<String>) -> Self {
		Self {
			cmd,
			evt,
			nonce: Some(nonce.into()),
			args: Some(args),
			data: None,
		}
	}

	/// Builds an inbound dispatch, as the application sends for subscribed events.
	pub fn dispatch(evt: EventKind, data: Value) -> Self {
		Self {
			cmd: Command::Dispatch,
			evt: Some(evt),
			nonce: None,
			args: None,
			data: Some(data),
		}
	}

	/// Builds an inbound reply to the request identified by `nonce`.
	pub fn reply(cmd: Command, nonce: impl Into<String>, data: Value) -> Self {
		Self {
			cmd,
			evt: None,
			nonce: Some(nonce.into()),
			args: None,
			data: Some(data),
		}
	}

	/// Builds an inbound error reply to the request identified by `nonce`.
	pub fn error_reply(cmd: Command, nonce: impl Into<String>, code: i64, message: &str) -> Self {
		Self {
			evt: Some(EventKind::Error),
			..Self::reply(cmd, nonce, serde_json::json!({ "code": code, "message": message }))
		}
	}

	/// Returns true for the `DISPATCH`/`READY` handshake.
	pub fn is_ready(&self) -> bool {
		self.cmd == Command::Dispatch && self.evt == Some(EventKind::Ready)
	}

	/// Returns true if the remote flagged this message as an error.
	pub fn is_error(&self) -> bool {
		self.evt == Some(EventKind::Error)
	}

	/// Inbound payload, or `null` when absent.
	pub fn data_or_null(&self) -> Value {
		self.data.clone().unwrap_or(Value::Null)
	}
}
