/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! In-memory per-user [`EditState`]: the in-flight add/edit form and the
//! in-flight OAuth device-code exchange. Not part of the ingestion core
//! proper; it lives here because the OAuth engine writes to it.

use moka::sync::Cache;

use super::ids::UserId;

/// Bounded capacity: evict oldest at 100
pub const MAX_TRACKED_USERS: u64 = 100;

/// Status of an in-flight device-code authorization, surfaced to the edit UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthStatus {
	/// Waiting on `initiate` to return a user code
	Idle,
	/// Polling; carries the code shown to the user
	Pending { user_code: String, verification_uri: String },
	/// `poll` returned a token response and the account was upserted
	Connected,
	/// `poll` returned a fatal error or the 5-minute ceiling was hit
	Failed { reason: String },
}

/// In-flight UI form state plus OAuth status for one user
#[derive(Debug, Clone, Default)]
pub struct EditState {
	pub form_fields: std::collections::BTreeMap<String, String>,
	pub oauth_status: Option<OAuthStatus>,
}

/// Evict-oldest-at-100 map from [`UserId`] to [`EditState`]
///
/// Backed by `moka`'s synchronous cache, the same TTL/bounded-cache crate
/// `iperka-paporg` reaches for to track pending OAuth authorizations.
#[derive(Clone)]
pub struct EditStateMap {
	inner: Cache<UserId, EditState>,
}

impl EditStateMap {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Cache::builder().max_capacity(MAX_TRACKED_USERS).build(),
		}
	}

	#[must_use]
	pub fn get(&self, user_id: &UserId) -> EditState {
		self.inner.get(user_id).unwrap_or_default()
	}

	pub fn update(&self, user_id: &UserId, f: impl FnOnce(&mut EditState)) {
		let mut state = self.get(user_id);
		f(&mut state);
		self.inner.insert(user_id.clone(), state);
	}

	pub fn clear(&self, user_id: &UserId) {
		self.inner.invalidate(user_id);
	}
}

impl Default for EditStateMap {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn update_then_get_round_trips() {
		let map = EditStateMap::new();
		let user = UserId::from("u1");

		map.update(&user, |state| {
			state.oauth_status = Some(OAuthStatus::Connected);
		});

		assert_eq!(map.get(&user).oauth_status, Some(OAuthStatus::Connected));
	}

	#[test]
	fn missing_user_returns_default() {
		let map = EditStateMap::new();
		let state = map.get(&UserId::from("ghost"));
		assert!(state.oauth_status.is_none());
	}
}
