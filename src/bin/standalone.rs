/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Runs the ingestion engine outside its host platform, against in-memory
//! fake host capabilities, for local exercising of the boot/shutdown path
//!
//! The host platform normally owns storage, secrets, scheduling, and chat
//! delivery; this binary only exists under the `scaffold` feature, to drive
//! the library standalone.

use std::{collections::HashMap, sync::Arc};

use mail_ingest_core::{
	host::fake::{FakeChatSink, FakeScheduler, FakeSecretVault, FakeStorage},
	supervisor::{HostFactory, Supervisor},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::from("mail_ingest_core=info")))
		.init();

	let extension_storage: Arc<dyn mail_ingest_core::host::Storage> = Arc::new(FakeStorage::new());
	let hosts = HostFactory {
		storage_for_user: Box::new(|_user_id| Arc::new(FakeStorage::new())),
		secrets_for_user: Box::new(|_user_id| Arc::new(FakeSecretVault::new())),
		chat_sink: Arc::new(FakeChatSink::new()),
		scheduler: Arc::new(FakeScheduler::new()),
		extension_storage,
		http_client: reqwest::Client::new(),
		oauth_configs: HashMap::new(),
	};

	let supervisor = Supervisor::new(hosts);

	if let Err(e) = supervisor.activate().await {
		tracing::error!("failed to activate supervisor: {e}");
		return;
	}
	tracing::info!("mail-ingest-core running standalone, no accounts registered, press ctrl-c to stop");

	let _ = tokio::signal::ctrl_c().await;
	tracing::info!("shutting down");
	supervisor.dispose().await;
}
