/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Capabilities the core requires from its host platform
//!
//! The core never talks to a database, an HTTP action dispatcher, or a chat
//! API directly; it only ever calls these traits, held as `Arc<dyn ...>` so
//! the supervisor can wire in whatever the host provides. [`fake`] provides
//! in-memory implementations the test suite runs end-to-end scenarios against.

pub mod fake;

use crate::model::{AccountId, UserId};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

/// A user's key-value document store: collections `accounts`, `settings`, `processed`
///
/// Documents travel as [`serde_json::Value`] rather than a generic type
/// parameter so this trait stays object-safe; callers serialize/deserialize
/// at the call site the same way the host's real adapter would cross an FFI
/// or RPC boundary.
#[async_trait]
pub trait Storage: Send + Sync + Debug {
	async fn get(&self, collection: &str, id: &str) -> crate::error::Result<Option<Value>>;
	async fn put(&self, collection: &str, id: &str, doc: Value) -> crate::error::Result<()>;
	async fn delete(&self, collection: &str, id: &str) -> crate::error::Result<()>;
	async fn find(&self, collection: &str, query: &Query) -> crate::error::Result<Vec<Value>>;
	async fn find_one(&self, collection: &str, query: &Query) -> crate::error::Result<Option<Value>>;
	async fn delete_many(&self, collection: &str, query: &Query) -> crate::error::Result<u64>;

	/// Inserts `doc` iff `id` doesn't already exist in `collection`, returning
	/// `true` on success. The host's real adapter backs this with a
	/// conditional put or a unique index; this is the operation
	/// [`crate::dedup_store::DedupStore::try_claim`] relies on for the
	/// exactly-once guarantee, so a `get`-then-`put` pair at the call site
	/// would not be sufficient.
	async fn put_if_absent(&self, collection: &str, id: &str, doc: Value) -> crate::error::Result<bool>;
}

/// A narrow filter: every (field, value) pair must match. Enough for the
/// equality lookups this core performs (`account_id = ..`, `enabled = true`).
#[derive(Debug, Clone, Default)]
pub struct Query {
	pub filters: Vec<(String, Value)>,
}

impl Query {
	#[must_use]
	pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self {
			filters: vec![(field.into(), value.into())],
		}
	}

	#[must_use]
	pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.filters.push((field.into(), value.into()));
		self
	}

	/// `true` if `doc` satisfies every filter, used by [`fake::FakeStorage`]
	#[must_use]
	pub fn matches(&self, doc: &Value) -> bool {
		self.filters
			.iter()
			.all(|(field, value)| doc.get(field) == Some(value))
	}
}

/// Per-user secret vault. Credentials live under key
/// `account-<id>-credentials`.
#[async_trait]
pub trait SecretVault: Send + Sync + Debug {
	async fn get(&self, key: &str) -> crate::error::Result<Option<String>>;
	async fn set(&self, key: &str, value: &str) -> crate::error::Result<()>;
	async fn delete(&self, key: &str) -> crate::error::Result<()>;
}

/// Builds the vault key for an account's credentials
#[must_use]
pub fn credentials_key(account_id: &AccountId) -> String {
	format!("account-{account_id}-credentials")
}

/// What the poll scheduler registers with the host scheduler
#[derive(Debug, Clone)]
pub struct ScheduledJob {
	pub id: String,
	/// the core always schedules the 5-minute fallback tick
	pub interval_secs: u64,
	pub user_id: UserId,
}

/// The fire payload delivered by [`Scheduler::on_fire`]
///
/// Pins the shape to `job_id` plus a mandatory `user_id` rather than an
/// optional one (see DESIGN.md for the rationale).
#[derive(Debug, Clone)]
pub struct FirePayload {
	pub job_id: String,
	pub user_id: UserId,
}

/// The host's job scheduler
#[async_trait]
pub trait Scheduler: Send + Sync + Debug {
	async fn schedule(&self, job: ScheduledJob) -> crate::error::Result<()>;
	async fn cancel(&self, job_id: &str) -> crate::error::Result<()>;
}

/// The external chat sink the delivery formatter posts to
#[async_trait]
pub trait ChatSink: Send + Sync + Debug {
	async fn append_instruction(&self, user_id: &UserId, text: &str) -> crate::error::Result<()>;
}

/// Read-only profile data used only for formatting
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
	pub first_name: Option<String>,
	pub nickname: Option<String>,
	pub language: Option<String>,
	pub timezone: Option<String>,
}

#[async_trait]
pub trait UserProfileProvider: Send + Sync + Debug {
	async fn get_profile(&self, user_id: &UserId) -> crate::error::Result<Option<UserProfile>>;
}

/// Host logger. The core itself always logs through `tracing`; this trait
/// exists for the production bridge that forwards `tracing` events into the
/// host's own sink.
pub trait Logger: Send + Sync {
	fn info(&self, message: &str);
	fn warn(&self, message: &str);
	fn debug(&self, message: &str);
}
