/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The supervisor: boot, runtime add/delete account handling, and a
//! drain-everything shutdown
//!
//! A single owner holds every long-lived task and is the only thing allowed
//! to cancel them.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use crate::{
	cancellation_token::CancellationToken,
	error::{IngestError, Result},
	host::{ChatSink, FirePayload, Scheduler, SecretVault, Storage, credentials_key},
	ingestion_worker::{IngestionWorker, WorkerHandle},
	model::{Account, AccountId, AuthKind, Credentials, EditStateMap, OAuthStatus, ProviderTag, UserId},
	oauth::{self, DeviceAuthorization, OAuthClientConfig, OAuthError},
	poll_scheduler,
	provider::Provider,
	user_registry::UserRegistry,
};

const ACCOUNTS_COLLECTION: &str = "accounts";

/// Per-(user) host handles plus provider-global config the supervisor needs
/// to start a worker. `Storage`/`SecretVault` are per-user instances.
pub struct HostFactory {
	pub storage_for_user: Box<dyn Fn(&UserId) -> Arc<dyn Storage> + Send + Sync>,
	pub secrets_for_user: Box<dyn Fn(&UserId) -> Arc<dyn SecretVault> + Send + Sync>,
	pub chat_sink: Arc<dyn ChatSink>,
	pub scheduler: Arc<dyn Scheduler>,
	pub extension_storage: Arc<dyn Storage>,
	pub http_client: reqwest::Client,
	pub oauth_configs: HashMap<Provider, OAuthClientConfig>,
}

/// Owns every running worker and drives boot/shutdown
pub struct Supervisor {
	hosts: HostFactory,
	registry: UserRegistry,
	workers: Mutex<HashMap<UserId, WorkerHandle>>,
	/// The in-flight add/edit-account UI state the OAuth engine writes to
	edit_states: EditStateMap,
}

impl Supervisor {
	#[must_use]
	pub fn new(hosts: HostFactory) -> Self {
		let registry = UserRegistry::new(Arc::clone(&hosts.extension_storage));
		Self {
			hosts,
			registry,
			workers: Mutex::new(HashMap::new()),
			edit_states: EditStateMap::new(),
		}
	}

	/// Current [`crate::model::EditState`] for `user_id`, for the host's UI to poll
	#[must_use]
	pub fn edit_state(&self, user_id: &UserId) -> crate::model::EditState {
		self.edit_states.get(user_id)
	}

	/// Boot sequence: for every user in the registry, start a worker and
	/// register its poll job
	pub async fn activate(&self) -> Result<()> {
		let users = self.registry.list().await?;
		tracing::info!(count = users.len(), "activating ingestion supervisor");

		for user_id in users {
			self.start_user(&user_id).await?;
		}

		Ok(())
	}

	async fn start_user(&self, user_id: &UserId) -> Result<()> {
		let mut workers = self.workers.lock().await;
		if let Some(handle) = workers.get(user_id) {
			// worker already running: nudge it to reconcile the account it just gained
			let _ = handle.poll_tx.send(());
			return Ok(());
		}

		let storage = (self.hosts.storage_for_user)(user_id);
		let secrets = (self.hosts.secrets_for_user)(user_id);

		let handle = IngestionWorker::spawn(
			user_id.clone(),
			storage,
			secrets,
			Arc::clone(&self.hosts.chat_sink),
			self.hosts.http_client.clone(),
			self.hosts.oauth_configs.clone(),
		);

		poll_scheduler::register(&self.hosts.scheduler, user_id).await?;
		workers.insert(user_id.clone(), handle);
		tracing::info!(user_id = %user_id, "ingestion worker started");
		Ok(())
	}

	/// Called by the new-account tool/UI-action path, at runtime rather than boot
	pub async fn on_account_added(&self, user_id: &UserId) -> Result<()> {
		self.registry.register(user_id).await?;
		self.start_user(user_id).await
	}

	/// Called by the delete-account path; `user_has_remaining_accounts` comes
	/// from the caller's own count query (the registry owns the set of users
	/// with accounts, not the count itself)
	pub async fn on_account_deleted(&self, user_id: &UserId, user_has_remaining_accounts: bool) -> Result<()> {
		if user_has_remaining_accounts {
			// worker keeps running for the remaining accounts; nudge it to drop the deleted one's session
			if let Some(handle) = self.workers.lock().await.get(user_id) {
				let _ = handle.poll_tx.send(());
			}
			return Ok(());
		}

		let handle = self.workers.lock().await.remove(user_id);
		if let Some(handle) = handle {
			handle.shutdown().await;
		}
		poll_scheduler::unregister(&self.hosts.scheduler, user_id).await?;
		self.registry.unregister(user_id).await
	}

	/// Routes a scheduler fire to the matching worker's poll channel
	pub async fn on_fire(&self, payload: &FirePayload) {
		if !poll_scheduler::matches(payload, &payload.user_id) {
			tracing::warn!(job_id = %payload.job_id, "scheduler fire with an unrecognized job id, ignoring");
			return;
		}
		let workers = self.workers.lock().await;
		if let Some(handle) = workers.get(&payload.user_id) {
			let _ = handle.poll_tx.send(());
		}
	}

	/// Shutdown: cancel every worker, cancel every poll job
	pub async fn dispose(&self) {
		let mut workers = self.workers.lock().await;
		for (user_id, handle) in workers.drain() {
			handle.shutdown().await;
			let _ = poll_scheduler::unregister(&self.hosts.scheduler, &user_id).await;
		}
		tracing::info!("ingestion supervisor disposed");
	}

	/// Starts a device-code authorization for a new OAuth2 account
	///
	/// Records [`OAuthStatus::Pending`] in the per-user edit state so the
	/// host's UI can show the user code immediately; call
	/// [`Supervisor::drive_oauth_connect`] (on whatever task the host runs
	/// long-lived work on) with the returned [`DeviceAuthorization`] to poll
	/// it to completion.
	pub async fn begin_oauth_connect(&self, user_id: &UserId, provider: Provider) -> Result<DeviceAuthorization> {
		let config = self.oauth_config(user_id, provider)?;

		let authorization = oauth::initiate(&self.hosts.http_client, &config).await.map_err(IngestError::OAuth)?;

		self.edit_states.update(user_id, |state| {
			state.oauth_status = Some(OAuthStatus::Pending {
				user_code: authorization.user_code.clone(),
				verification_uri: authorization.verification_uri.clone(),
			});
		});

		Ok(authorization)
	}

	/// Polls `authorization` to completion and upserts the resulting account
	///
	/// On success, registers the user, (re)starts its worker, and sets
	/// [`OAuthStatus::Connected`]; on failure or expiry, sets
	/// [`OAuthStatus::Failed`] and leaves no partial account behind.
	pub async fn drive_oauth_connect(
		&self,
		user_id: &UserId,
		provider: Provider,
		display_name: String,
		email: String,
		authorization: DeviceAuthorization,
	) -> Result<AccountId> {
		let config = self.oauth_config(user_id, provider)?;

		// held only to satisfy `poll_until_complete`'s signature; nothing ever cancels it
		let (mut cancel, _cancel_tx) = CancellationToken::new();

		let outcome = oauth::poll_until_complete(&self.hosts.http_client, &config, &authorization, &mut cancel).await;

		let token = match outcome {
			Ok(token) => token,
			Err(e) => {
				self.edit_states.update(user_id, |state| {
					state.oauth_status = Some(OAuthStatus::Failed { reason: e.to_string() });
				});
				return Err(IngestError::OAuth(e));
			}
		};

		let Some(refresh_token) = token.refresh_token.clone() else {
			let reason = "authorization server did not return a refresh token".to_owned();
			self.edit_states.update(user_id, |state| {
				state.oauth_status = Some(OAuthStatus::Failed { reason: reason.clone() });
			});
			return Err(IngestError::OAuth(OAuthError::Fatal(reason)));
		};

		let account_id = AccountId::generate();
		let account = Account {
			id: account_id.clone(),
			provider: provider_tag(provider),
			display_name,
			email,
			imap_host: None,
			imap_port: None,
			security: None,
			auth: AuthKind::OAuth2,
			enabled: true,
			last_sync: None,
			last_error: None,
		};
		account.validate().map_err(|_| IngestError::Programmer {
			user_id: user_id.to_string(),
			what: "oauth-connected account failed its own invariants",
		})?;

		let creds = Credentials::OAuth2 {
			access_token: token.access_token.into(),
			refresh_token: refresh_token.into(),
			expires_at: crate::provider::expires_at_from_now(token.expires_in),
		};

		let storage = (self.hosts.storage_for_user)(user_id);
		let secrets = (self.hosts.secrets_for_user)(user_id);
		let doc = serde_json::to_value(&account).map_err(|e| IngestError::Storage(e.to_string()))?;
		storage.put(ACCOUNTS_COLLECTION, account_id.as_str(), doc).await?;
		let raw_creds = serde_json::to_string(&creds).map_err(|e| IngestError::Storage(e.to_string()))?;
		secrets.set(&credentials_key(&account_id), &raw_creds).await?;

		self.on_account_added(user_id).await?;

		self.edit_states.update(user_id, |state| {
			state.oauth_status = Some(OAuthStatus::Connected);
		});

		Ok(account_id)
	}

	fn oauth_config(&self, user_id: &UserId, provider: Provider) -> Result<OAuthClientConfig> {
		self.hosts.oauth_configs.get(&provider).cloned().ok_or_else(|| IngestError::Programmer {
			user_id: user_id.to_string(),
			what: "no oauth client configured for this provider",
		})
	}
}

fn provider_tag(provider: Provider) -> ProviderTag {
	match provider {
		Provider::Icloud => ProviderTag::Icloud,
		Provider::Gmail => ProviderTag::Gmail,
		Provider::Outlook => ProviderTag::Outlook,
		Provider::GenericImap => ProviderTag::Imap,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::fake::{FakeChatSink, FakeScheduler, FakeSecretVault, FakeStorage};

	fn hosts(extension_storage: Arc<dyn Storage>, scheduler: Arc<dyn Scheduler>) -> HostFactory {
		HostFactory {
			storage_for_user: Box::new(|_user_id| Arc::new(FakeStorage::new()) as Arc<dyn Storage>),
			secrets_for_user: Box::new(|_user_id| Arc::new(FakeSecretVault::new()) as Arc<dyn SecretVault>),
			chat_sink: Arc::new(FakeChatSink::new()),
			scheduler,
			extension_storage,
			http_client: reqwest::Client::new(),
			oauth_configs: HashMap::new(),
		}
	}

	#[tokio::test]
	async fn activate_starts_a_worker_per_registered_user() {
		let extension_storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let scheduler: Arc<dyn Scheduler> = Arc::new(FakeScheduler::new());
		let supervisor = Supervisor::new(hosts(Arc::clone(&extension_storage), scheduler));

		supervisor.registry.register(&UserId::from("u1")).await.unwrap();
		supervisor.registry.register(&UserId::from("u2")).await.unwrap();

		supervisor.activate().await.unwrap();

		assert_eq!(supervisor.workers.lock().await.len(), 2);
	}

	#[tokio::test]
	async fn on_account_added_registers_the_user_and_schedules_a_poll_job() {
		let extension_storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let fake_scheduler = FakeScheduler::new();
		let scheduled = Arc::clone(&fake_scheduler.scheduled);
		let scheduler: Arc<dyn Scheduler> = Arc::new(fake_scheduler);
		let supervisor = Supervisor::new(hosts(extension_storage, scheduler));

		supervisor.on_account_added(&UserId::from("u1")).await.unwrap();

		assert_eq!(supervisor.registry.list().await.unwrap(), vec![UserId::from("u1")]);
		assert_eq!(scheduled.lock().unwrap().len(), 1);
		assert_eq!(supervisor.workers.lock().await.len(), 1);
	}

	#[tokio::test]
	async fn on_account_added_twice_reuses_the_running_worker() {
		let extension_storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let fake_scheduler = FakeScheduler::new();
		let scheduled = Arc::clone(&fake_scheduler.scheduled);
		let scheduler: Arc<dyn Scheduler> = Arc::new(fake_scheduler);
		let supervisor = Supervisor::new(hosts(extension_storage, scheduler));

		let user_id = UserId::from("u1");
		supervisor.on_account_added(&user_id).await.unwrap();
		supervisor.on_account_added(&user_id).await.unwrap();

		assert_eq!(supervisor.workers.lock().await.len(), 1);
		assert_eq!(scheduled.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn on_account_deleted_with_remaining_accounts_keeps_the_worker_running() {
		let extension_storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let scheduler: Arc<dyn Scheduler> = Arc::new(FakeScheduler::new());
		let supervisor = Supervisor::new(hosts(extension_storage, scheduler));

		let user_id = UserId::from("u1");
		supervisor.on_account_added(&user_id).await.unwrap();
		supervisor.on_account_deleted(&user_id, true).await.unwrap();

		assert_eq!(supervisor.workers.lock().await.len(), 1);
		assert_eq!(supervisor.registry.list().await.unwrap(), vec![user_id]);
	}

	#[tokio::test]
	async fn on_account_deleted_without_remaining_accounts_tears_everything_down() {
		let extension_storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let fake_scheduler = FakeScheduler::new();
		let cancelled = Arc::clone(&fake_scheduler.cancelled);
		let scheduler: Arc<dyn Scheduler> = Arc::new(fake_scheduler);
		let supervisor = Supervisor::new(hosts(extension_storage, scheduler));

		let user_id = UserId::from("u1");
		supervisor.on_account_added(&user_id).await.unwrap();
		supervisor.on_account_deleted(&user_id, false).await.unwrap();

		assert!(supervisor.workers.lock().await.is_empty());
		assert!(supervisor.registry.list().await.unwrap().is_empty());
		assert_eq!(cancelled.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn on_fire_with_an_unrecognized_job_id_is_ignored() {
		let extension_storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let scheduler: Arc<dyn Scheduler> = Arc::new(FakeScheduler::new());
		let supervisor = Supervisor::new(hosts(extension_storage, scheduler));

		let user_id = UserId::from("u1");
		supervisor.on_account_added(&user_id).await.unwrap();

		// doesn't match poll_scheduler::job_id(&user_id); must be a no-op, not a panic
		supervisor
			.on_fire(&FirePayload { job_id: "bogus".to_owned(), user_id })
			.await;
	}

	#[tokio::test]
	async fn dispose_shuts_down_every_worker_and_unregisters_every_poll_job() {
		let extension_storage: Arc<dyn Storage> = Arc::new(FakeStorage::new());
		let fake_scheduler = FakeScheduler::new();
		let cancelled = Arc::clone(&fake_scheduler.cancelled);
		let scheduler: Arc<dyn Scheduler> = Arc::new(fake_scheduler);
		let supervisor = Supervisor::new(hosts(extension_storage, scheduler));

		supervisor.on_account_added(&UserId::from("u1")).await.unwrap();
		supervisor.on_account_added(&UserId::from("u2")).await.unwrap();

		supervisor.dispose().await;

		assert!(supervisor.workers.lock().await.is_empty());
		assert_eq!(cancelled.lock().unwrap().len(), 2);
	}
}
