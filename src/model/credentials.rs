/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! [`Credentials`], the sum type stored in the host's secret vault

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials for one [`super::account::Account`]
///
/// Never derives `Debug`: see the hand-written impl below, which prints only
/// the variant name rather than the secret itself.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
	Password {
		username: String,
		password: SecretString,
	},
	#[serde(rename = "oauth2")]
	OAuth2 {
		access_token: SecretString,
		refresh_token: SecretString,
		expires_at: DateTime<Utc>,
	},
}

impl Credentials {
	/// `true` if this is the `OAuth2` variant
	#[must_use]
	pub fn is_oauth2(&self) -> bool {
		matches!(self, Self::OAuth2 { .. })
	}

	/// Exposes the raw access token, for building the `XOAUTH2` SASL blob
	///
	/// # Panics
	/// Panics if called on `Password` credentials; callers must check
	/// [`Credentials::is_oauth2`] first.
	#[must_use]
	pub fn access_token(&self) -> &str {
		match self {
			Self::OAuth2 { access_token, .. } => access_token.expose_secret(),
			Self::Password { .. } => {
				unreachable!("access_token() called on password credentials")
			}
		}
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Password { .. } => f.write_str("Credentials::Password(<redacted>)"),
			Self::OAuth2 { expires_at, .. } => {
				write!(f, "Credentials::OAuth2 {{ expires_at: {expires_at}, .. }}")
			}
		}
	}
}
