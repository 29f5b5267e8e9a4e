//! Identity and handshake payloads.
//!
//! Only the fields the client itself relies on are typed; everything else the
//! application sends is preserved in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user as reported by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
	pub id: String,
	pub username: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub discriminator: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub global_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub avatar: Option<String>,
	#[serde(default)]
	pub bot: bool,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// The application the client authenticated as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
	pub id: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub rpc_origins: Vec<String>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Environment settings sent with the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
	#[serde(default)]
	pub cdn_host: Option<String>,
	#[serde(default)]
	pub api_endpoint: Option<String>,
	#[serde(default)]
	pub environment: Option<String>,
}

/// Payload of the `DISPATCH`/`READY` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
	#[serde(default)]
	pub v: u32,
	#[serde(default)]
	pub config: ServerConfig,
	#[serde(default)]
	pub user: Option<User>,
}

/// Reply to `AUTHORIZE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
	pub code: String,
}

/// Reply to `AUTHENTICATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateResponse {
	pub application: Application,
	pub user: User,
	#[serde(default)]
	pub scopes: Vec<String>,
	#[serde(default)]
	pub expires: Option<String>,
}

/// Payload of an `ERROR` event, and of IPC `CLOSE` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	#[serde(default)]
	pub code: i64,
	#[serde(default)]
	pub message: String,
}

/// Payload of `ACTIVITY_JOIN` and `ACTIVITY_SPECTATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySecret {
	pub secret: String,
}

/// Payload of `ACTIVITY_JOIN_REQUEST`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
	pub user: User,
}

/// Arguments of `AUTHORIZE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizeArgs {
	pub client_id: String,
	pub scopes: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub prompt: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub rpc_token: Option<String>,
}

/// Arguments of `AUTHENTICATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticateArgs {
	pub access_token: String,
}
