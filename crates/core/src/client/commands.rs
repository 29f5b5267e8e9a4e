//! Convenience wrappers over [`Client::request`] for common commands.
//!
//! Payloads are passed through as JSON; building activity objects is up to
//! the caller.

use drpc_protocol::{Command, EventKind};
use drpc_runtime::Result;
use serde_json::{Value, json};

use super::Client;

impl Client {
	/// Sets the rich presence activity of this process.
	pub async fn set_activity(&self, activity: Value) -> Result<Value> {
		self.request(Command::SetActivity, json!({ "pid": std::process::id(), "activity": activity }))
			.await
	}

	/// Clears the rich presence activity of this process.
	pub async fn clear_activity(&self) -> Result<Value> {
		self.request(Command::SetActivity, json!({ "pid": std::process::id() })).await
	}

	/// Accepts an `ACTIVITY_JOIN_REQUEST` from `user_id`.
	pub async fn send_join_invite(&self, user_id: &str) -> Result<Value> {
		self.request(Command::SendActivityJoinInvite, json!({ "user_id": user_id })).await
	}

	/// Rejects an `ACTIVITY_JOIN_REQUEST` from `user_id`.
	pub async fn close_join_request(&self, user_id: &str) -> Result<Value> {
		self.request(Command::CloseActivityRequest, json!({ "user_id": user_id })).await
	}

	/// Guilds visible to the authenticated user.
	pub async fn get_guilds(&self) -> Result<Vec<Value>> {
		let data = self.request(Command::GetGuilds, json!({})).await?;
		Ok(match data.get("guilds") {
			Some(Value::Array(guilds)) => guilds.clone(),
			_ => Vec::new(),
		})
	}

	pub async fn get_channel(&self, channel_id: &str) -> Result<Value> {
		self.request(Command::GetChannel, json!({ "channel_id": channel_id })).await
	}

	/// Subscribes to `evt`. Matching dispatches arrive as
	/// [`RpcEvent`](crate::RpcEvent)s on the event stream and handlers.
	pub async fn subscribe(&self, evt: EventKind, args: Value) -> Result<EventSubscription> {
		self.request_with_event(Command::Subscribe, args.clone(), Some(evt)).await?;
		tracing::debug!(?evt, "Subscribed");
		Ok(EventSubscription {
			client: self.clone(),
			evt,
			args,
		})
	}
}

/// A server-side event subscription created by [`Client::subscribe`].
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
#[derive(Clone)]
pub struct EventSubscription {
	client: Client,
	evt: EventKind,
	args: Value,
}

impl EventSubscription {
	pub fn event(&self) -> EventKind {
		self.evt
	}

	pub fn args(&self) -> &Value {
		&self.args
	}

	/// Sends `UNSUBSCRIBE` with the original event and arguments.
	pub async fn unsubscribe(self) -> Result<Value> {
		self.client
			.request_with_event(Command::Unsubscribe, self.args.clone(), Some(self.evt))
			.await
	}
}

impl std::fmt::Debug for EventSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventSubscription")
			.field("evt", &self.evt)
			.field("args", &self.args)
			.finish()
	}
}
