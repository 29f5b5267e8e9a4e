//! OAuth2 credential exchange against the HTTP API.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use drpc_protocol::{RpcTokenRequest, RpcTokenResponse, TokenRequest, TokenResponse};
use drpc_runtime::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed future returned by [`CredentialExchange`] operations.
pub type ExchangeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Remote token endpoint used by the token lifecycle.
///
/// Replies are returned unvalidated; the token manager checks them.
pub trait CredentialExchange: Send + Sync {
	/// Exchanges the code returned by `AUTHORIZE`.
	fn exchange_code<'a>(&'a self, code: &'a str) -> ExchangeFuture<'a, TokenResponse>;

	/// Exchanges a refresh token for a new token pair.
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> ExchangeFuture<'a, TokenResponse>;

	/// Fetches an RPC token to pass along with `AUTHORIZE`.
	fn rpc_token(&self) -> ExchangeFuture<'_, RpcTokenResponse>;
}

/// [`CredentialExchange`] posting form bodies with `reqwest`.
pub struct HttpCredentialExchange {
	http: reqwest::Client,
	token_url: String,
	rpc_token_url: String,
	client_id: String,
	client_secret: Option<String>,
	redirect_uri: Option<String>,
}

impl HttpCredentialExchange {
	pub fn new(config: &ClientConfig) -> Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(HTTP_TIMEOUT)
			.build()
			.map_err(|e| Error::Http(format!("Failed to create HTTP client: {e}")))?;
		Ok(Self {
			http,
			token_url: config.token_url(),
			rpc_token_url: config.rpc_token_url(),
			client_id: config.client_id.clone(),
			client_secret: config.client_secret.clone(),
			redirect_uri: config.redirect_uri.clone(),
		})
	}

	async fn post_form<B, T>(&self, url: &str, body: &B) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		tracing::debug!(url, "Posting credential exchange");
		let response = self
			.http
			.post(url)
			.form(body)
			.send()
			.await
			.map_err(|e| Error::Http(format!("{url}: {e}")))?;

		let status = response.status();
		if !status.is_success() {
			let text = response.text().await.unwrap_or_default();
			return Err(Error::Http(format!("{url} returned {status}: {text}")));
		}

		response
			.json::<T>()
			.await
			.map_err(|e| Error::Http(format!("Failed to parse reply from {url}: {e}")))
	}
}

impl CredentialExchange for HttpCredentialExchange {
	fn exchange_code<'a>(&'a self, code: &'a str) -> ExchangeFuture<'a, TokenResponse> {
		Box::pin(async move {
			let body = TokenRequest::AuthorizationCode {
				client_id: self.client_id.clone(),
				client_secret: self.client_secret.clone(),
				code: code.to_string(),
				redirect_uri: self.redirect_uri.clone(),
			};
			self.post_form(&self.token_url, &body).await
		})
	}

	fn refresh<'a>(&'a self, refresh_token: &'a str) -> ExchangeFuture<'a, TokenResponse> {
		Box::pin(async move {
			let body = TokenRequest::RefreshToken {
				client_id: self.client_id.clone(),
				client_secret: self.client_secret.clone(),
				refresh_token: refresh_token.to_string(),
			};
			self.post_form(&self.token_url, &body).await
		})
	}

	fn rpc_token(&self) -> ExchangeFuture<'_, RpcTokenResponse> {
		Box::pin(async move {
			let Some(client_secret) = self.client_secret.clone() else {
				return Err(Error::InvalidArgument("an RPC token requires a client secret".to_string()));
			};
			let body = RpcTokenRequest {
				client_id: self.client_id.clone(),
				client_secret,
			};
			self.post_form(&self.rpc_token_url, &body).await
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn endpoints_follow_api_base() {
		let mut config = ClientConfig::new("123");
		config.api_base = "http://127.0.0.1:9/api".into();
		let exchange = HttpCredentialExchange::new(&config).unwrap();
		assert_eq!(exchange.token_url, "http://127.0.0.1:9/api/oauth2/token");
		assert_eq!(exchange.rpc_token_url, "http://127.0.0.1:9/api/oauth2/token/rpc");
	}

	#[tokio::test]
	async fn rpc_token_without_secret_is_rejected() {
		let exchange = HttpCredentialExchange::new(&ClientConfig::new("123")).unwrap();
		let err = exchange.rpc_token().await.unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn unreachable_endpoint_is_an_http_error() {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);

		let mut config = ClientConfig::new("123");
		config.api_base = format!("http://127.0.0.1:{port}/api");
		let exchange = HttpCredentialExchange::new(&config).unwrap();
		assert!(matches!(exchange.exchange_code("code").await, Err(Error::Http(_))));
	}
}
