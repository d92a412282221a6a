/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The user registry: an extension-scoped set of user ids with at least one
//! enabled account, authoritative for boot-time worker launch

use std::sync::Arc;

use crate::{error::Result, host::Storage, model::UserId};

const COLLECTION: &str = "users";

/// Wraps an extension-scoped [`Storage`] instance (as opposed to the
/// per-user instances the rest of the core uses) over the `users` collection
pub struct UserRegistry {
	storage: Arc<dyn Storage>,
}

impl UserRegistry {
	#[must_use]
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	/// Self-healing: called on first-account-save, OAuth success, and any tool
	/// invocation that observes ≥1 account for a user
	pub async fn register(&self, user_id: &UserId) -> Result<()> {
		self.storage
			.put(COLLECTION, user_id.as_str(), serde_json::json!({ "user_id": user_id.as_str() }))
			.await
	}

	/// Called when account deletion leaves `user_id` with zero enabled accounts
	pub async fn unregister(&self, user_id: &UserId) -> Result<()> {
		self.storage.delete(COLLECTION, user_id.as_str()).await
	}

	/// Drives boot: every registered user gets a worker started
	pub async fn list(&self) -> Result<Vec<UserId>> {
		let docs = self.storage.find(COLLECTION, &crate::host::Query::default()).await?;
		Ok(docs
			.iter()
			.filter_map(|doc| doc.get("user_id").and_then(serde_json::Value::as_str))
			.map(UserId::from)
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::fake::FakeStorage;

	#[tokio::test]
	async fn register_then_list_round_trips() {
		let registry = UserRegistry::new(Arc::new(FakeStorage::new()));
		registry.register(&UserId::from("u1")).await.unwrap();
		registry.register(&UserId::from("u2")).await.unwrap();

		let mut users = registry.list().await.unwrap();
		users.sort();
		assert_eq!(users, vec![UserId::from("u1"), UserId::from("u2")]);
	}

	#[tokio::test]
	async fn unregister_removes_the_user() {
		let registry = UserRegistry::new(Arc::new(FakeStorage::new()));
		registry.register(&UserId::from("u1")).await.unwrap();
		registry.unregister(&UserId::from("u1")).await.unwrap();

		assert!(registry.list().await.unwrap().is_empty());
	}
}
