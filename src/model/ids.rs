/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Newtype ids so a `UserId` and an `AccountId` can never be swapped by accident

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
	($name:ident) => {
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		pub struct $name(pub String);

		impl $name {
			#[must_use]
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl From<String> for $name {
			fn from(value: String) -> Self {
				Self(value)
			}
		}

		impl From<&str> for $name {
			fn from(value: &str) -> Self {
				Self(value.to_owned())
			}
		}
	};
}

string_id!(UserId);
string_id!(AccountId);

impl AccountId {
	/// Mints a fresh id for an account the OAuth2 engine upserts on its own
	/// behalf, rather than one assigned by the host's add-account form
	#[must_use]
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}
}

/// An RFC-5322 `Message-ID` header value, used as the dedup key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for MessageId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// An IMAP UID: per-mailbox monotonic, survives mailbox reopen
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uid(pub u32);

impl Uid {
	/// The "uninitialised baseline" watermark value
	pub const BASELINE: Self = Self(0);
}

impl fmt::Display for Uid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}
