//! OAuth2 token exchange bodies and replies.
//!
//! Requests are form-encoded; replies are JSON. A token reply is only usable
//! when it carries all of `access_token`, `refresh_token`, `token_type` and
//! `expires_in`; [`TokenResponse::into_grant`] enforces that.

use serde::{Deserialize, Serialize};

/// Form body posted to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum TokenRequest {
	/// Exchange an authorization code returned by `AUTHORIZE`.
	AuthorizationCode {
		client_id: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		client_secret: Option<String>,
		code: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		redirect_uri: Option<String>,
	},
	/// Exchange a refresh token for a new token pair.
	RefreshToken {
		client_id: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		client_secret: Option<String>,
		refresh_token: String,
	},
}

/// Form body posted to the RPC token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcTokenRequest {
	pub client_id: String,
	pub client_secret: String,
}

/// Reply from the RPC token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcTokenResponse {
	pub rpc_token: String,
}

/// Raw reply from the token endpoint, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
	#[serde(default)]
	pub access_token: Option<String>,
	#[serde(default)]
	pub refresh_token: Option<String>,
	#[serde(default)]
	pub token_type: Option<String>,
	#[serde(default)]
	pub expires_in: Option<u64>,
	#[serde(default)]
	pub scope: Option<String>,
}

/// A complete token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
	pub access_token: String,
	pub refresh_token: String,
	pub token_type: String,
	/// Lifetime in seconds.
	pub expires_in: u64,
	pub scope: Option<String>,
}

impl TokenResponse {
	/// Names of the required fields this reply lacks.
	pub fn missing_fields(&self) -> Vec<&'static str> {
		let mut missing = Vec::new();
		if self.access_token.is_none() {
			missing.push("access_token");
		}
		if self.refresh_token.is_none() {
			missing.push("refresh_token");
		}
		if self.token_type.is_none() {
			missing.push("token_type");
		}
		if self.expires_in.is_none() {
			missing.push("expires_in");
		}
		missing
	}

	/// Validates the reply, returning the missing field names on failure.
	pub fn into_grant(self) -> Result<TokenGrant, Vec<&'static str>> {
		match self {
			TokenResponse {
				access_token: Some(access_token),
				refresh_token: Some(refresh_token),
				token_type: Some(token_type),
				expires_in: Some(expires_in),
				scope,
			} => Ok(TokenGrant {
				access_token,
				refresh_token,
				token_type,
				expires_in,
				scope,
			}),
			incomplete => Err(incomplete.missing_fields()),
		}
	}
}
