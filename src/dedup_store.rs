/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The dedup / watermark store: the exactly-once boundary
//!
//! Built against the [`crate::host::Storage`] capability using the
//! `processed` collection and [`crate::model::ProcessedRecord::doc_id`]'s
//! deterministic id: deriving the id from (account, message-id) and combining
//! it with a conditional put is what makes delivery exactly-once.

use std::sync::Arc;

use crate::{
	error::{IngestError, Result},
	host::{Query, Storage},
	model::{AccountId, MessageId, ProcessedRecord, Uid},
};

const COLLECTION: &str = "processed";

/// Reads and atomically claims processed records for one user scope
#[derive(Clone)]
pub struct DedupStore {
	storage: Arc<dyn Storage>,
}

impl DedupStore {
	#[must_use]
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	/// `max(uid where account_id=account)` or [`Uid::BASELINE`] if empty
	pub async fn watermark(&self, account: &AccountId) -> Result<Uid> {
		let docs = self
			.storage
			.find(COLLECTION, &Query::eq("account_id", account.as_str()))
			.await
			.map_err(storage_err)?;

		Ok(docs
			.iter()
			.filter_map(|doc| doc.get("uid").and_then(serde_json::Value::as_u64))
			.map(|uid| Uid(uid as u32))
			.max()
			.unwrap_or(Uid::BASELINE))
	}

	/// `true` if a Processed row already exists for (account, message_id)
	pub async fn is_processed(&self, account: &AccountId, message_id: &MessageId) -> Result<bool> {
		let id = ProcessedRecord::doc_id(account, message_id);
		Ok(self.storage.get(COLLECTION, &id).await.map_err(storage_err)?.is_some())
	}

	/// Idempotent insert; no-op if the row already exists
	pub async fn mark_processed(&self, account: &AccountId, message_id: &MessageId, uid: Uid) -> Result<()> {
		self.try_claim(account, message_id, uid).await?;
		Ok(())
	}

	/// Atomically inserts the row iff none exists yet, returning `true` on success
	///
	/// Exactly one caller racing on the same (account, message_id) observes
	/// `true`; this is the exactly-once boundary, backed by
	/// [`Storage::put_if_absent`] rather than a `get`-then-`put` pair here.
	pub async fn try_claim(&self, account: &AccountId, message_id: &MessageId, uid: Uid) -> Result<bool> {
		let id = ProcessedRecord::doc_id(account, message_id);
		let record = ProcessedRecord {
			account_id: account.clone(),
			message_id: message_id.clone(),
			uid,
			processed_at: chrono::Utc::now(),
		};
		let doc = serde_json::to_value(&record).map_err(|e| IngestError::Storage(e.to_string()))?;
		self.storage.put_if_absent(COLLECTION, &id, doc).await.map_err(storage_err)
	}
}

fn storage_err(e: IngestError) -> IngestError {
	e
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::fake::FakeStorage;

	fn ids() -> (AccountId, MessageId) {
		(AccountId::from("acct-1"), MessageId::from("m1@example.com"))
	}

	#[tokio::test]
	async fn watermark_is_zero_for_an_empty_account() {
		let store = DedupStore::new(Arc::new(FakeStorage::new()));
		assert_eq!(store.watermark(&AccountId::from("acct-1")).await.unwrap(), Uid::BASELINE);
	}

	#[tokio::test]
	async fn try_claim_succeeds_exactly_once() {
		let (account, message_id) = ids();
		let store = DedupStore::new(Arc::new(FakeStorage::new()));

		assert!(store.try_claim(&account, &message_id, Uid(12)).await.unwrap());
		assert!(!store.try_claim(&account, &message_id, Uid(12)).await.unwrap());
		assert_eq!(store.watermark(&account).await.unwrap(), Uid(12));
	}

	#[tokio::test]
	async fn concurrent_claims_on_the_same_key_yield_one_winner() {
		let (account, message_id) = ids();
		let store = DedupStore::new(Arc::new(FakeStorage::new()));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let store = store.clone();
			let account = account.clone();
			let message_id = message_id.clone();
			handles.push(tokio::spawn(
				async move { store.try_claim(&account, &message_id, Uid(1)).await.unwrap() },
			));
		}

		let mut wins = 0;
		for handle in handles {
			if handle.await.unwrap() {
				wins += 1;
			}
		}
		assert_eq!(wins, 1, "exactly one claimant should win");
	}

	#[tokio::test]
	async fn mark_processed_is_idempotent() {
		let (account, message_id) = ids();
		let store = DedupStore::new(Arc::new(FakeStorage::new()));

		store.mark_processed(&account, &message_id, Uid(5)).await.unwrap();
		store.mark_processed(&account, &message_id, Uid(5)).await.unwrap();
		assert!(store.is_processed(&account, &message_id).await.unwrap());
	}
}
