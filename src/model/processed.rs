/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The [`ProcessedRecord`] entity - the exactly-once guard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, MessageId, Uid};

/// One row per (account, message-id) that has already been delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
	pub account_id: AccountId,
	pub message_id: MessageId,
	pub uid: Uid,
	pub processed_at: DateTime<Utc>,
}

impl ProcessedRecord {
	/// The deterministic document id used by the host KV store:
	/// `prc_<account>_<messageId>`
	#[must_use]
	pub fn doc_id(account_id: &AccountId, message_id: &MessageId) -> String {
		format!("prc_{}_{}", account_id.as_str(), message_id.as_str())
	}
}
