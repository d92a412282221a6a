/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The ingestion worker: one per user, supervising N IDLE sessions plus a
//! token-refresh loop.

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
	time::Duration,
};
use tokio::sync::{mpsc, watch};

use secrecy::ExposeSecret;

use crate::{
	cancellation_token::CancellationToken,
	dedup_store::DedupStore,
	delivery,
	error::{IngestError, Result},
	host::{ChatSink, Query, SecretVault, Storage, credentials_key},
	idle_session::IdleSession,
	imap_connector::{DEFAULT_FETCH_LIMIT, ImapConnector},
	model::{Account, AccountId, Credentials, Settings, Uid, UserId},
	oauth,
	provider::Provider,
};

/// Check every active OAuth2 account for token expiry this often
pub const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

const ACCOUNTS_COLLECTION: &str = "accounts";
const SETTINGS_COLLECTION: &str = "settings";
const SETTINGS_DOC_ID: &str = "settings";

struct AccountSession {
	cancel_tx: watch::Sender<()>,
	task: tokio::task::JoinHandle<crate::idle_session::Outcome>,
}

/// What the supervisor keeps to talk to a running worker
pub struct WorkerHandle {
	/// fed by the poll scheduler on every fire for this user
	pub poll_tx: mpsc::UnboundedSender<()>,
	cancel_tx: watch::Sender<()>,
	task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
	/// Cancels the worker and waits for it to drain
	pub async fn shutdown(self) {
		let _ = self.cancel_tx.send(());
		let _ = self.task.await;
	}
}

/// Per-user ingestion: spawns and supervises one [`IdleSession`] per enabled
/// account, and a recurring OAuth2 token-refresh sweep
pub struct IngestionWorker {
	user_id: UserId,
	storage: Arc<dyn Storage>,
	secrets: Arc<dyn SecretVault>,
	chat_sink: Arc<dyn ChatSink>,
	http_client: reqwest::Client,
	oauth_configs: HashMap<Provider, oauth::OAuthClientConfig>,
	dedup: DedupStore,
	/// accounts whose first new-mail event this process lifetime has already
	/// been treated as a baseline resync
	initialized: HashSet<AccountId>,
}

impl IngestionWorker {
	#[must_use]
	pub fn new(
		user_id: UserId,
		storage: Arc<dyn Storage>,
		secrets: Arc<dyn SecretVault>,
		chat_sink: Arc<dyn ChatSink>,
		http_client: reqwest::Client,
		oauth_configs: HashMap<Provider, oauth::OAuthClientConfig>,
	) -> Self {
		Self {
			dedup: DedupStore::new(Arc::clone(&storage)),
			user_id,
			storage,
			secrets,
			chat_sink,
			http_client,
			oauth_configs,
			initialized: HashSet::new(),
		}
	}

	/// Builds a worker and spawns it as a background task, returning a handle
	/// the supervisor uses to feed it poll-scheduler fires and shut it down
	#[must_use]
	pub fn spawn(
		user_id: UserId,
		storage: Arc<dyn Storage>,
		secrets: Arc<dyn SecretVault>,
		chat_sink: Arc<dyn ChatSink>,
		http_client: reqwest::Client,
		oauth_configs: HashMap<Provider, oauth::OAuthClientConfig>,
	) -> WorkerHandle {
		let mut worker = Self::new(user_id, storage, secrets, chat_sink, http_client, oauth_configs);
		let (cancel, cancel_tx) = CancellationToken::new();
		let (poll_tx, poll_rx) = mpsc::unbounded_channel();

		let task = tokio::spawn(async move { worker.run(cancel, poll_rx).await });

		WorkerHandle { poll_tx, cancel_tx, task }
	}

	/// Runs until `cancel` fires
	#[tracing::instrument(skip(self, cancel, poll_rx), fields(user_id = %self.user_id))]
	async fn run(&mut self, mut cancel: CancellationToken, mut poll_rx: mpsc::UnboundedReceiver<()>) {
		let accounts = match self.load_enabled_accounts().await {
			Ok(accounts) => accounts,
			Err(e) => {
				tracing::error!(user_id = %self.user_id, "failed to load accounts at worker boot: {e}");
				return;
			}
		};

		let (new_mail_tx, mut new_mail_rx) = mpsc::unbounded_channel::<AccountId>();
		let mut sessions: HashMap<AccountId, AccountSession> = HashMap::new();

		for account in accounts {
			match self.spawn_session(&account, new_mail_tx.clone()).await {
				Ok(session) => {
					sessions.insert(account.id.clone(), session);
				}
				Err(e) => {
					tracing::warn!(account_id = %account.id, "failed to start IDLE session: {e}");
				}
			}
		}

		let mut refresh_tick = tokio::time::interval(TOKEN_REFRESH_INTERVAL);
		refresh_tick.tick().await; // first tick fires immediately; skip it

		loop {
			tokio::select! {
				() = cancel.cancelled() => {
					self.shutdown(sessions).await;
					return;
				}
				Some(account_id) = new_mail_rx.recv() => {
					if let Err(e) = self.handle_new_mail(&account_id).await {
						tracing::warn!(account_id = %account_id, user_id = %self.user_id, "new-mail handling failed: {e}");
					}
				}
				Some(()) = poll_rx.recv() => {
					self.poll_tick(&mut sessions, &new_mail_tx).await;
				}
				_ = refresh_tick.tick() => {
					self.refresh_sweep(&mut sessions, &new_mail_tx).await;
				}
			}
		}
	}

	/// Drives the same new-mail path as IDLE for every enabled account, and
	/// reconciles `sessions` against accounts added/disabled since boot
	///
	/// The supervisor nudges `poll_tx` on a new-account/delete-account event
	/// in addition to the poll scheduler's 5-minute fallback fire, so this is
	/// also how a running worker picks up an account it didn't know about at boot.
	async fn poll_tick(&mut self, sessions: &mut HashMap<AccountId, AccountSession>, new_mail_tx: &mpsc::UnboundedSender<AccountId>) {
		let accounts = match self.load_enabled_accounts().await {
			Ok(accounts) => accounts,
			Err(e) => {
				tracing::warn!(user_id = %self.user_id, "poll tick could not load accounts: {e}");
				return;
			}
		};

		let enabled_ids: HashSet<_> = accounts.iter().map(|account| account.id.clone()).collect();
		sessions.retain(|account_id, session| {
			if enabled_ids.contains(account_id) {
				true
			} else {
				let _ = session.cancel_tx.send(());
				false
			}
		});

		for account in &accounts {
			if sessions.contains_key(&account.id) {
				continue;
			}
			match self.spawn_session(account, new_mail_tx.clone()).await {
				Ok(session) => {
					sessions.insert(account.id.clone(), session);
					tracing::info!(account_id = %account.id, "started IDLE session for newly enabled account");
				}
				Err(e) => {
					tracing::warn!(account_id = %account.id, "failed to start IDLE session: {e}");
				}
			}
		}

		for account in accounts {
			if let Err(e) = self.handle_new_mail(&account.id).await {
				tracing::warn!(account_id = %account.id, user_id = %self.user_id, "poll-driven ingestion failed: {e}");
			}
		}
	}

	async fn shutdown(&self, sessions: HashMap<AccountId, AccountSession>) {
		for (account_id, session) in sessions {
			let _ = session.cancel_tx.send(());
			if let Err(e) = session.task.await {
				tracing::warn!(account_id = %account_id, "IDLE session task panicked during shutdown: {e}");
			}
		}
		tracing::info!(user_id = %self.user_id, "ingestion worker drained");
	}

	async fn spawn_session(
		&self,
		account: &Account,
		new_mail_tx: mpsc::UnboundedSender<AccountId>,
	) -> Result<AccountSession> {
		let connector = self.build_connector(account).await?;
		let (cancel, cancel_tx) = CancellationToken::new();
		let mut session = IdleSession::new(account.id.clone(), connector, new_mail_tx);
		let task = tokio::spawn(async move { session.run(cancel).await });
		Ok(AccountSession { cancel_tx, task })
	}

	async fn refresh_sweep(
		&mut self,
		sessions: &mut HashMap<AccountId, AccountSession>,
		new_mail_tx: &mpsc::UnboundedSender<AccountId>,
	) {
		let accounts = match self.load_enabled_accounts().await {
			Ok(accounts) => accounts,
			Err(e) => {
				tracing::warn!(user_id = %self.user_id, "failed to load accounts during refresh sweep: {e}");
				return;
			}
		};

		for account in accounts {
			let provider = Provider::from_tag(account.provider);
			if !provider.supports_oauth2() {
				continue;
			}

			let creds = match self.load_credentials(&account.id).await {
				Ok(creds) => creds,
				Err(e) => {
					tracing::warn!(account_id = %account.id, "could not load credentials for refresh sweep: {e}");
					continue;
				}
			};

			if !provider.needs_refresh(&creds) {
				continue;
			}

			tracing::info!(account_id = %account.id, "access token needs refresh, rotating IDLE session");
			match self.refresh_credentials(&account, creds).await {
				Ok(_) => {
					if let Some(old) = sessions.remove(&account.id) {
						let _ = old.cancel_tx.send(());
						let _ = old.task.await;
					}
					match self.spawn_session(&account, new_mail_tx.clone()).await {
						Ok(session) => {
							sessions.insert(account.id.clone(), session);
						}
						Err(e) => {
							tracing::warn!(account_id = %account.id, "failed to restart IDLE session after refresh: {e}");
						}
					}
				}
				Err(e) => {
					tracing::warn!(account_id = %account.id, "token refresh failed, keeping stale session: {e}");
				}
			}
		}
	}

	async fn handle_new_mail(&mut self, account_id: &AccountId) -> Result<()> {
		let Some(account) = self.load_account(account_id).await? else {
			return Ok(());
		};
		if !account.enabled {
			return Ok(());
		}

		let since = self.dedup.watermark(account_id).await?;
		let connector = self.build_connector(&account).await?;

		// `HashSet::insert` returns `true` only the first time this account is seen
		let first_event_this_process = self.initialized.insert(account_id.clone());

		if since == Uid::BASELINE || first_event_this_process {
			let emails = connector.fetch_since(since, DEFAULT_FETCH_LIMIT).await?;
			if let Some(newest) = emails.iter().max_by_key(|e| e.uid.0) {
				self.dedup.mark_processed(account_id, &newest.message_id, newest.uid).await?;
			}
			self.touch_last_sync(&account).await?;
			return Ok(());
		}

		let emails = connector.fetch_since(since, DEFAULT_FETCH_LIMIT).await?;
		let settings = self.load_settings().await?;

		for email in &emails {
			if self.dedup.try_claim(account_id, &email.message_id, email.uid).await? {
				let text = delivery::format_instruction(email, &account, &settings);
				delivery::deliver(&self.chat_sink, &self.user_id, &text).await;
			}
		}

		self.touch_last_sync(&account).await?;
		Ok(())
	}

	async fn build_connector(&self, account: &Account) -> Result<ImapConnector> {
		let provider = Provider::from_tag(account.provider);
		let creds = self.load_credentials(&account.id).await?;
		let creds = if provider.needs_refresh(&creds) {
			self.refresh_credentials(account, creds).await?
		} else {
			creds
		};
		let params = provider.connection_params(account, &creds)?;
		Ok(ImapConnector::new(params))
	}

	async fn refresh_credentials(&self, account: &Account, creds: Credentials) -> Result<Credentials> {
		let provider = Provider::from_tag(account.provider);
		let refresh_token = match &creds {
			Credentials::OAuth2 { refresh_token, .. } => refresh_token.expose_secret().to_owned(),
			Credentials::Password { .. } => {
				return Err(IngestError::Programmer {
					user_id: self.user_id.to_string(),
					what: "refresh_credentials called for a password account",
				});
			}
		};

		let config = self.oauth_configs.get(&provider).ok_or_else(|| IngestError::Programmer {
			user_id: self.user_id.to_string(),
			what: "no OAuth client configuration registered for this provider",
		})?;

		let token = oauth::refresh(&self.http_client, config, &refresh_token).await?;
		let updated = crate::provider::apply_refresh(&creds, token.access_token, token.refresh_token, token.expires_in);
		self.store_credentials(&account.id, &updated).await?;
		Ok(updated)
	}

	async fn load_enabled_accounts(&self) -> Result<Vec<Account>> {
		let docs = self
			.storage
			.find(ACCOUNTS_COLLECTION, &Query::eq("enabled", true))
			.await?;
		docs.into_iter()
			.map(|doc| serde_json::from_value(doc).map_err(|e| IngestError::Storage(e.to_string())))
			.collect()
	}

	async fn load_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
		let Some(doc) = self.storage.get(ACCOUNTS_COLLECTION, account_id.as_str()).await? else {
			return Ok(None);
		};
		Ok(Some(serde_json::from_value(doc).map_err(|e| IngestError::Storage(e.to_string()))?))
	}

	/// Updates `last_sync` to now and clears `last_error`
	async fn touch_last_sync(&self, account: &Account) -> Result<()> {
		let mut updated = account.clone();
		updated.last_sync = Some(chrono::Utc::now());
		updated.last_error = None;
		let doc = serde_json::to_value(&updated).map_err(|e| IngestError::Storage(e.to_string()))?;
		self.storage.put(ACCOUNTS_COLLECTION, updated.id.as_str(), doc).await?;
		Ok(())
	}

	async fn load_credentials(&self, account_id: &AccountId) -> Result<Credentials> {
		let key = credentials_key(account_id);
		let Some(raw) = self.secrets.get(&key).await? else {
			return Err(IngestError::Programmer {
				user_id: self.user_id.to_string(),
				what: "account has no stored credentials",
			});
		};
		serde_json::from_str(&raw).map_err(|e| IngestError::Storage(e.to_string()))
	}

	async fn store_credentials(&self, account_id: &AccountId, creds: &Credentials) -> Result<()> {
		let key = credentials_key(account_id);
		let raw = serde_json::to_string(creds).map_err(|e| IngestError::Storage(e.to_string()))?;
		self.secrets.set(&key, &raw).await?;
		Ok(())
	}

	async fn load_settings(&self) -> Result<Settings> {
		match self.storage.get(SETTINGS_COLLECTION, SETTINGS_DOC_ID).await? {
			Some(doc) => Ok(serde_json::from_value(doc).map_err(|e| IngestError::Storage(e.to_string()))?),
			None => Ok(Settings::default()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		host::fake::{FakeChatSink, FakeSecretVault, FakeStorage},
		model::{AuthKind, ProviderTag},
	};

	fn worker() -> (IngestionWorker, Arc<dyn Storage>, Arc<dyn SecretVault>) {
		let storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let secrets: Arc<dyn SecretVault> = Arc::new(FakeSecretVault::new());
		let chat_sink: Arc<dyn ChatSink> = Arc::new(FakeChatSink::new());
		let worker = IngestionWorker::new(
			UserId::from("u1"),
			Arc::clone(&storage),
			Arc::clone(&secrets),
			chat_sink,
			reqwest::Client::new(),
			HashMap::new(),
		);
		(worker, storage, secrets)
	}

	fn account(enabled: bool) -> Account {
		Account {
			id: AccountId::from("a1"),
			provider: ProviderTag::Icloud,
			display_name: "Personal".to_owned(),
			email: "me@icloud.com".to_owned(),
			imap_host: None,
			imap_port: None,
			security: None,
			auth: AuthKind::Password,
			enabled,
			last_sync: None,
			last_error: Some("stale error".to_owned()),
		}
	}

	#[tokio::test]
	async fn load_enabled_accounts_filters_on_the_enabled_flag() {
		let (worker, storage, _secrets) = worker();
		storage
			.put("accounts", "a1", serde_json::to_value(account(true)).unwrap())
			.await
			.unwrap();
		storage
			.put("accounts", "a2", serde_json::to_value({
				let mut a = account(false);
				a.id = AccountId::from("a2");
				a
			}).unwrap())
			.await
			.unwrap();

		let enabled = worker.load_enabled_accounts().await.unwrap();
		assert_eq!(enabled.len(), 1);
		assert_eq!(enabled[0].id, AccountId::from("a1"));
	}

	#[tokio::test]
	async fn touch_last_sync_sets_timestamp_and_clears_error() {
		let (worker, storage, _secrets) = worker();
		let mut acc = account(true);
		storage.put("accounts", "a1", serde_json::to_value(&acc).unwrap()).await.unwrap();

		worker.touch_last_sync(&acc).await.unwrap();

		let reloaded = worker.load_account(&AccountId::from("a1")).await.unwrap().unwrap();
		assert!(reloaded.last_sync.is_some());
		assert!(reloaded.last_error.is_none());

		acc.last_sync = reloaded.last_sync;
		acc.last_error = None;
		assert_eq!(acc.email, reloaded.email);
	}

	#[tokio::test]
	async fn credentials_round_trip_through_the_secret_vault() {
		let (worker, _storage, _secrets) = worker();
		let creds = Credentials::Password {
			username: "me@icloud.com".to_owned(),
			password: "hunter2".to_owned().into(),
		};
		worker.store_credentials(&AccountId::from("a1"), &creds).await.unwrap();

		let loaded = worker.load_credentials(&AccountId::from("a1")).await.unwrap();
		assert!(!loaded.is_oauth2());
	}

	#[tokio::test]
	async fn load_credentials_is_a_programmer_error_when_missing() {
		let (worker, _storage, _secrets) = worker();
		let err = worker.load_credentials(&AccountId::from("ghost")).await.unwrap_err();
		assert_eq!(err.kind(), crate::error::ErrorKind::Programmer);
	}

	#[tokio::test]
	async fn load_settings_defaults_when_absent() {
		let (worker, _storage, _secrets) = worker();
		let settings = worker.load_settings().await.unwrap();
		assert!(settings.instruction.is_empty());
	}
}
