/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! A small capability over the four account variants rather than a deep
//! inheritance hierarchy. Each variant carries its fixed endpoint as data:
//! iCloud, Gmail and Outlook hardcode their well-known IMAP host, while
//! `GenericImap` reads one from the account's own configuration.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use staticstr::StaticStr;

use crate::model::{Account, AuthKind, Credentials, ProviderTag, Security};

/// How long before expiry a token is proactively refreshed
pub const REFRESH_SKEW: ChronoDuration = ChronoDuration::minutes(5);

/// Connection parameters an [`crate::imap_connector::ImapConnector`] needs to dial a server
///
/// `host` is a [`StaticStr`] because three of the four providers ship a fixed
/// `&'static str` endpoint; only `GenericImap` allocates one from the
/// account's own configuration.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
	pub host: StaticStr,
	pub port: u16,
	pub tls_mode: TlsMode,
	pub auth: AuthMaterial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
	Ssl,
	Starttls,
	None,
}

/// What the IMAP connector authenticates with, already resolved from [`Credentials`]
#[derive(Debug, Clone)]
pub enum AuthMaterial {
	Password { username: String, password: String },
	XOAuth2 { username: String, access_token: String },
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
	#[error("account {0} uses oauth2 credentials but its provider requires a password")]
	ExpectedPassword(crate::model::AccountId),
	#[error("account {0} uses password credentials but its provider requires oauth2")]
	ExpectedOAuth2(crate::model::AccountId),
	#[error("generic IMAP account {0} has no imap_host configured")]
	MissingHost(crate::model::AccountId),
	#[error("refresh() called for a provider that doesn't support oauth2 token refresh")]
	RefreshNotSupported,
}

/// The provider an account talks to, with its capability implemented per-variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
	Icloud,
	Gmail,
	Outlook,
	GenericImap,
}

impl Provider {
	#[must_use]
	pub fn from_tag(tag: ProviderTag) -> Self {
		match tag {
			ProviderTag::Icloud => Self::Icloud,
			ProviderTag::Gmail => Self::Gmail,
			ProviderTag::Outlook => Self::Outlook,
			ProviderTag::Imap => Self::GenericImap,
		}
	}

	/// Builds the IMAP connection parameters for `account`/`creds`
	pub fn connection_params(
		&self,
		account: &Account,
		creds: &Credentials,
	) -> Result<ConnectionParams, ProviderError> {
		let (host, port) = self.fixed_endpoint(account)?;

		let auth = match (self, creds) {
			(Self::Icloud | Self::GenericImap, Credentials::Password { username, password }) => {
				use secrecy::ExposeSecret;
				AuthMaterial::Password {
					username: username.clone(),
					password: password.expose_secret().to_owned(),
				}
			}
			(Self::Gmail | Self::Outlook, Credentials::OAuth2 { .. }) => AuthMaterial::XOAuth2 {
				username: account.email.clone(),
				access_token: creds.access_token().to_owned(),
			},
			(Self::Icloud | Self::GenericImap, Credentials::OAuth2 { .. }) => {
				return Err(ProviderError::ExpectedPassword(account.id.clone()));
			}
			(Self::Gmail | Self::Outlook, Credentials::Password { .. }) => {
				return Err(ProviderError::ExpectedOAuth2(account.id.clone()));
			}
		};

		Ok(ConnectionParams {
			host,
			port,
			tls_mode: self.tls_mode(account),
			auth,
		})
	}

	fn fixed_endpoint(&self, account: &Account) -> Result<(StaticStr, u16), ProviderError> {
		match self {
			Self::Icloud => Ok(("imap.mail.me.com".into(), 993)),
			Self::Gmail => Ok(("imap.gmail.com".into(), 993)),
			Self::Outlook => Ok(("outlook.office365.com".into(), 993)),
			Self::GenericImap => {
				let host = account
					.imap_host
					.clone()
					.ok_or_else(|| ProviderError::MissingHost(account.id.clone()))?;
				Ok((host.into(), account.imap_port.unwrap_or(993)))
			}
		}
	}

	fn tls_mode(&self, account: &Account) -> TlsMode {
		match self {
			Self::Icloud | Self::Gmail | Self::Outlook => TlsMode::Ssl,
			Self::GenericImap => match account.security {
				Some(Security::Ssl) | None => TlsMode::Ssl,
				Some(Security::Starttls) => TlsMode::Starttls,
				Some(Security::None) => TlsMode::None,
			},
		}
	}

	/// `true` when `creds` should be refreshed before the next connection attempt
	#[must_use]
	pub fn needs_refresh(&self, creds: &Credentials) -> bool {
		match creds {
			Credentials::Password { .. } => false,
			Credentials::OAuth2 { expires_at, .. } => Utc::now() >= *expires_at - REFRESH_SKEW,
		}
	}

	/// `true` for providers that authenticate with oauth2 and therefore support [`crate::oauth`] refresh
	#[must_use]
	pub fn supports_oauth2(&self) -> bool {
		matches!(self, Self::Gmail | Self::Outlook)
	}
}

/// Applies a refreshed token response to existing credentials, preserving the
/// refresh token when the authorization server omitted a new one
#[must_use]
pub fn apply_refresh(
	previous: &Credentials,
	access_token: String,
	new_refresh_token: Option<String>,
	expires_in_secs: i64,
) -> Credentials {
	let refresh_token = match (new_refresh_token, previous) {
		(Some(token), _) => token,
		(None, Credentials::OAuth2 { refresh_token, .. }) => {
			use secrecy::ExposeSecret;
			refresh_token.expose_secret().to_owned()
		}
		(None, Credentials::Password { .. }) => {
			unreachable!("apply_refresh only ever runs against oauth2 credentials")
		}
	};

	Credentials::OAuth2 {
		access_token: access_token.into(),
		refresh_token: refresh_token.into(),
		expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
	}
}

/// The absolute instant a freshly-minted token expires, for consumers converting `expires_in`
#[must_use]
pub fn expires_at_from_now(expires_in_secs: i64) -> DateTime<Utc> {
	Utc::now() + ChronoDuration::seconds(expires_in_secs)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::AccountId;

	fn gmail_account() -> Account {
		Account {
			id: AccountId::from("a1"),
			provider: ProviderTag::Gmail,
			display_name: "Gmail".to_owned(),
			email: "me@gmail.com".to_owned(),
			imap_host: None,
			imap_port: None,
			security: None,
			auth: AuthKind::OAuth2,
			enabled: true,
			last_sync: None,
			last_error: None,
		}
	}

	#[test]
	fn gmail_has_fixed_endpoint() {
		let provider = Provider::Gmail;
		let creds = Credentials::OAuth2 {
			access_token: "tok".to_owned().into(),
			refresh_token: "rt".to_owned().into(),
			expires_at: Utc::now() + ChronoDuration::hours(1),
		};
		let params = provider.connection_params(&gmail_account(), &creds).unwrap();
		assert_eq!(params.host.as_str(), "imap.gmail.com");
		assert_eq!(params.port, 993);
		assert!(matches!(params.auth, AuthMaterial::XOAuth2 { .. }));
	}

	#[test]
	fn gmail_rejects_password_credentials() {
		let provider = Provider::Gmail;
		let creds = Credentials::Password {
			username: "me@gmail.com".to_owned(),
			password: "hunter2".to_owned().into(),
		};
		assert!(matches!(
			provider.connection_params(&gmail_account(), &creds),
			Err(ProviderError::ExpectedOAuth2(_))
		));
	}

	#[test]
	fn needs_refresh_respects_five_minute_skew() {
		let provider = Provider::Gmail;
		let fresh = Credentials::OAuth2 {
			access_token: "tok".to_owned().into(),
			refresh_token: "rt".to_owned().into(),
			expires_at: Utc::now() + ChronoDuration::minutes(10),
		};
		assert!(!provider.needs_refresh(&fresh));

		let about_to_expire = Credentials::OAuth2 {
			access_token: "tok".to_owned().into(),
			refresh_token: "rt".to_owned().into(),
			expires_at: Utc::now() + ChronoDuration::minutes(2),
		};
		assert!(provider.needs_refresh(&about_to_expire));
	}

	#[test]
	fn apply_refresh_preserves_refresh_token_when_omitted() {
		use secrecy::ExposeSecret;

		let previous = Credentials::OAuth2 {
			access_token: "old".to_owned().into(),
			refresh_token: "keep-me".to_owned().into(),
			expires_at: Utc::now(),
		};

		let updated = apply_refresh(&previous, "new".to_owned(), None, 3600);
		match updated {
			Credentials::OAuth2 { access_token, refresh_token, expires_at } => {
				assert_eq!(access_token.expose_secret(), "new");
				assert_eq!(refresh_token.expose_secret(), "keep-me");
				assert!(expires_at > Utc::now() + ChronoDuration::minutes(59));
			}
			Credentials::Password { .. } => panic!("expected oauth2 credentials"),
		}
	}
}
