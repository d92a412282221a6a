/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The [`Account`] entity and its provider/security tags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AccountId;

/// Which mailbox provider an [`Account`] talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
	Icloud,
	Gmail,
	Outlook,
	Imap,
}

/// Transport security for a generic IMAP account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
	Ssl,
	Starttls,
	None,
}

/// Which credential shape an [`Account`] expects; must match [`super::credentials::Credentials`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
	Password,
	OAuth2,
}

/// One mail account belonging to one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
	pub id: AccountId,
	pub provider: ProviderTag,
	pub display_name: String,
	pub email: String,

	/// Only meaningful for `ProviderTag::Imap`
	pub imap_host: Option<String>,
	pub imap_port: Option<u16>,
	pub security: Option<Security>,

	pub auth: AuthKind,
	pub enabled: bool,

	pub last_sync: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
}

/// Raised when an [`Account`]'s fields violate its cross-field invariants
#[derive(Debug, thiserror::Error)]
pub enum AccountInvariantError {
	#[error("generic IMAP account {0} is missing an imap_host")]
	MissingImapHost(AccountId),
	#[error("{provider:?} account {id} must use oauth2 authentication")]
	MustUseOAuth2 { id: AccountId, provider: ProviderTag },
	#[error("{provider:?} account {id} must use password authentication")]
	MustUsePassword { id: AccountId, provider: ProviderTag },
}

impl Account {
	/// Validates the cross-field invariants between provider, auth kind, and imap_host
	pub fn validate(&self) -> Result<(), AccountInvariantError> {
		match self.provider {
			ProviderTag::Imap if self.imap_host.is_none() => {
				return Err(AccountInvariantError::MissingImapHost(self.id.clone()));
			}
			ProviderTag::Gmail | ProviderTag::Outlook if self.auth != AuthKind::OAuth2 => {
				return Err(AccountInvariantError::MustUseOAuth2 {
					id: self.id.clone(),
					provider: self.provider,
				});
			}
			ProviderTag::Icloud if self.auth != AuthKind::Password => {
				return Err(AccountInvariantError::MustUsePassword {
					id: self.id.clone(),
					provider: self.provider,
				});
			}
			_ => {}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base(provider: ProviderTag, auth: AuthKind) -> Account {
		Account {
			id: AccountId::from("acc1"),
			provider,
			display_name: "Work".to_owned(),
			email: "me@example.com".to_owned(),
			imap_host: None,
			imap_port: None,
			security: None,
			auth,
			enabled: true,
			last_sync: None,
			last_error: None,
		}
	}

	#[test]
	fn generic_imap_requires_host() {
		let acc = base(ProviderTag::Imap, AuthKind::Password);
		assert!(matches!(
			acc.validate(),
			Err(AccountInvariantError::MissingImapHost(_))
		));
	}

	#[test]
	fn gmail_requires_oauth2() {
		let acc = base(ProviderTag::Gmail, AuthKind::Password);
		assert!(matches!(
			acc.validate(),
			Err(AccountInvariantError::MustUseOAuth2 { .. })
		));
	}

	#[test]
	fn icloud_requires_password() {
		let acc = base(ProviderTag::Icloud, AuthKind::OAuth2);
		assert!(matches!(
			acc.validate(),
			Err(AccountInvariantError::MustUsePassword { .. })
		));
	}

	#[test]
	fn valid_accounts_pass() {
		let mut imap = base(ProviderTag::Imap, AuthKind::Password);
		imap.imap_host = Some("mail.example.com".to_owned());
		assert!(imap.validate().is_ok());

		assert!(base(ProviderTag::Gmail, AuthKind::OAuth2).validate().is_ok());
		assert!(base(ProviderTag::Outlook, AuthKind::OAuth2).validate().is_ok());
		assert!(base(ProviderTag::Icloud, AuthKind::Password).validate().is_ok());
	}
}
