/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! In-memory host capability implementations for tests

use async_trait::async_trait;
use serde_json::Value;
use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use super::{ChatSink, Query, Scheduler, ScheduledJob, SecretVault, Storage};
use crate::model::UserId;

/// An in-memory document store keyed by `collection/id`
#[derive(Debug, Default, Clone)]
pub struct FakeStorage {
	docs: Arc<Mutex<HashMap<String, HashMap<String, Value>>>>,
}

impl FakeStorage {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Storage for FakeStorage {
	async fn get(&self, collection: &str, id: &str) -> crate::error::Result<Option<Value>> {
		let docs = self.docs.lock().expect("fake storage mutex poisoned");
		Ok(docs.get(collection).and_then(|c| c.get(id)).cloned())
	}

	async fn put(&self, collection: &str, id: &str, doc: Value) -> crate::error::Result<()> {
		let mut docs = self.docs.lock().expect("fake storage mutex poisoned");
		docs.entry(collection.to_owned())
			.or_default()
			.insert(id.to_owned(), doc);
		Ok(())
	}

	async fn delete(&self, collection: &str, id: &str) -> crate::error::Result<()> {
		let mut docs = self.docs.lock().expect("fake storage mutex poisoned");
		if let Some(c) = docs.get_mut(collection) {
			c.remove(id);
		}
		Ok(())
	}

	async fn find(&self, collection: &str, query: &Query) -> crate::error::Result<Vec<Value>> {
		let docs = self.docs.lock().expect("fake storage mutex poisoned");
		Ok(docs
			.get(collection)
			.into_iter()
			.flat_map(std::collections::HashMap::values)
			.filter(|doc| query.matches(doc))
			.cloned()
			.collect())
	}

	async fn find_one(&self, collection: &str, query: &Query) -> crate::error::Result<Option<Value>> {
		Ok(self.find(collection, query).await?.into_iter().next())
	}

	async fn delete_many(&self, collection: &str, query: &Query) -> crate::error::Result<u64> {
		let mut docs = self.docs.lock().expect("fake storage mutex poisoned");
		let Some(c) = docs.get_mut(collection) else {
			return Ok(0);
		};
		let to_remove: Vec<String> = c
			.iter()
			.filter(|(_, doc)| query.matches(doc))
			.map(|(id, _)| id.clone())
			.collect();
		for id in &to_remove {
			c.remove(id);
		}
		Ok(to_remove.len() as u64)
	}

	async fn put_if_absent(&self, collection: &str, id: &str, doc: Value) -> crate::error::Result<bool> {
		// single critical section covering the absence check and the insert,
		// so concurrent callers racing on the same id never both win
		let mut docs = self.docs.lock().expect("fake storage mutex poisoned");
		let entry = docs.entry(collection.to_owned()).or_default();
		if entry.contains_key(id) {
			return Ok(false);
		}
		entry.insert(id.to_owned(), doc);
		Ok(true)
	}
}

/// An in-memory secret vault
#[derive(Debug, Default, Clone)]
pub struct FakeSecretVault {
	secrets: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeSecretVault {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl SecretVault for FakeSecretVault {
	async fn get(&self, key: &str) -> crate::error::Result<Option<String>> {
		Ok(self
			.secrets
			.lock()
			.expect("fake vault mutex poisoned")
			.get(key)
			.cloned())
	}

	async fn set(&self, key: &str, value: &str) -> crate::error::Result<()> {
		self.secrets
			.lock()
			.expect("fake vault mutex poisoned")
			.insert(key.to_owned(), value.to_owned());
		Ok(())
	}

	async fn delete(&self, key: &str) -> crate::error::Result<()> {
		self.secrets
			.lock()
			.expect("fake vault mutex poisoned")
			.remove(key);
		Ok(())
	}
}

/// Records every instruction posted instead of sending it anywhere, so tests
/// can assert on exactly-once delivery
#[derive(Debug, Default, Clone)]
pub struct FakeChatSink {
	pub posted: Arc<Mutex<Vec<(UserId, String)>>>,
}

impl FakeChatSink {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn count_containing(&self, needle: &str) -> usize {
		self.posted
			.lock()
			.expect("fake sink mutex poisoned")
			.iter()
			.filter(|(_, text)| text.contains(needle))
			.count()
	}
}

#[async_trait]
impl ChatSink for FakeChatSink {
	async fn append_instruction(&self, user_id: &UserId, text: &str) -> crate::error::Result<()> {
		self.posted
			.lock()
			.expect("fake sink mutex poisoned")
			.push((user_id.clone(), text.to_owned()));
		Ok(())
	}
}

/// Records scheduled/cancelled job ids instead of driving a real scheduler
#[derive(Debug, Default, Clone)]
pub struct FakeScheduler {
	pub scheduled: Arc<Mutex<Vec<ScheduledJob>>>,
	pub cancelled: Arc<Mutex<Vec<String>>>,
}

impl FakeScheduler {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Scheduler for FakeScheduler {
	async fn schedule(&self, job: ScheduledJob) -> crate::error::Result<()> {
		self.scheduled
			.lock()
			.expect("fake scheduler mutex poisoned")
			.push(job);
		Ok(())
	}

	async fn cancel(&self, job_id: &str) -> crate::error::Result<()> {
		self.cancelled
			.lock()
			.expect("fake scheduler mutex poisoned")
			.push(job_id.to_owned());
		Ok(())
	}
}
