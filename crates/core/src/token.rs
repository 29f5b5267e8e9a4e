//! OAuth2 token lifecycle.
//!
//! A [`TokenManager`] holds the current token pair and a one-shot refresh
//! timer. Each stored grant re-arms the timer for `expires_in` seconds; when
//! it fires, the refresh token is exchanged and the result stored again.
//! [`shutdown`](TokenManager::shutdown) aborts the timer and bumps an epoch so
//! a refresh already in flight cannot store or reschedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use drpc_protocol::{TokenGrant, TokenResponse};
use drpc_runtime::{Error, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::events::{ClientEvent, EventBus};
use crate::oauth::CredentialExchange;

struct TokenInner {
	exchange: Arc<dyn CredentialExchange>,
	/// Held while `epoch` changes, so a store either lands before a shutdown or not at all.
	grant: Mutex<Option<TokenGrant>>,
	timer: Mutex<Option<JoinHandle<()>>>,
	epoch: AtomicU64,
	events: Option<Arc<EventBus<ClientEvent>>>,
}

/// Current tokens plus the refresh timer. Cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
	inner: Arc<TokenInner>,
}

impl TokenManager {
	pub fn new(exchange: Arc<dyn CredentialExchange>) -> Self {
		Self::build(exchange, None)
	}

	pub(crate) fn with_events(exchange: Arc<dyn CredentialExchange>, events: Arc<EventBus<ClientEvent>>) -> Self {
		Self::build(exchange, Some(events))
	}

	fn build(exchange: Arc<dyn CredentialExchange>, events: Option<Arc<EventBus<ClientEvent>>>) -> Self {
		Self {
			inner: Arc::new(TokenInner {
				exchange,
				grant: Mutex::new(None),
				timer: Mutex::new(None),
				epoch: AtomicU64::new(0),
				events,
			}),
		}
	}

	pub fn exchange(&self) -> &Arc<dyn CredentialExchange> {
		&self.inner.exchange
	}

	/// Validates and stores a token reply, re-arming the refresh timer.
	///
	/// # Errors
	///
	/// [`Error::MalformedTokenResponse`] if a required field is missing. Nothing
	/// is stored or scheduled in that case.
	pub fn store(&self, response: TokenResponse) -> Result<TokenGrant> {
		let epoch = self.inner.epoch.load(Ordering::SeqCst);
		self.inner.store(response, epoch)
	}

	pub fn grant(&self) -> Option<TokenGrant> {
		self.inner.grant.lock().clone()
	}

	pub fn access_token(&self) -> Option<String> {
		self.inner.grant.lock().as_ref().map(|grant| grant.access_token.clone())
	}

	/// Returns true while a refresh is scheduled.
	pub fn is_refresh_scheduled(&self) -> bool {
		self.inner.timer.lock().as_ref().is_some_and(|handle| !handle.is_finished())
	}

	/// Cancels the refresh timer and clears the tokens.
	pub fn shutdown(&self) {
		let mut grant = self.inner.grant.lock();
		self.inner.epoch.fetch_add(1, Ordering::SeqCst);
		grant.take();
		if let Some(handle) = self.inner.timer.lock().take() {
			handle.abort();
		}
		drop(grant);
		tracing::debug!("Token manager shut down");
	}
}

impl TokenInner {
	fn store(self: &Arc<Self>, response: TokenResponse, epoch: u64) -> Result<TokenGrant> {
		let grant = response
			.into_grant()
			.map_err(|missing| Error::MalformedTokenResponse { missing })?;

		let mut current = self.grant.lock();
		if self.epoch.load(Ordering::SeqCst) != epoch {
			return Err(Error::Unknown("token manager was shut down".to_string()));
		}
		*current = Some(grant.clone());
		self.schedule(Duration::from_secs(grant.expires_in), epoch);
		drop(current);
		tracing::debug!(expires_in = grant.expires_in, "Stored access token");
		Ok(grant)
	}

	fn schedule(self: &Arc<Self>, delay: Duration, epoch: u64) {
		let weak: Weak<Self> = Arc::downgrade(self);
		let handle = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if let Some(inner) = weak.upgrade() {
				inner.refresh_due(epoch).await;
			}
		});
		if let Some(previous) = self.timer.lock().replace(handle) {
			previous.abort();
		}
	}

	async fn refresh_due(self: Arc<Self>, epoch: u64) {
		if self.epoch.load(Ordering::SeqCst) != epoch {
			return;
		}
		// Detach our own handle so rescheduling does not abort this task.
		self.timer.lock().take();

		let Some(refresh_token) = self.grant.lock().as_ref().map(|grant| grant.refresh_token.clone()) else {
			return;
		};

		tracing::debug!("Refreshing access token");
		let result = match self.exchange.refresh(&refresh_token).await {
			Ok(response) if self.epoch.load(Ordering::SeqCst) == epoch => self.store(response, epoch).map(|_| ()),
			Ok(_) => return,
			Err(err) => Err(err),
		};

		if let Err(err) = result {
			tracing::warn!(error = %err, "Token refresh failed");
			if let Some(events) = &self.events {
				events.emit(ClientEvent::Debug(format!("token refresh failed: {err}")));
			}
		}
	}
}
