/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The OAuth2 Device Authorization Grant engine (RFC 8628)

use serde::Deserialize;
use std::time::Duration;

use crate::provider::Provider;

/// At most this many polling iterations, each spaced `interval` seconds apart
pub const MAX_POLL_ITERATIONS: u32 = 60;

/// Per-provider device-code/token endpoints and scopes
///
/// The `gmail`/`outlook` constructors below cover the two built-in providers;
/// a host wiring up a non-standard IMAP-with-oauth2 provider can reach for
/// [`OAuthClientConfig::builder`] directly instead.
#[derive(Debug, Clone, bon::Builder)]
pub struct OAuthClientConfig {
	pub provider: Provider,
	pub client_id: String,
	/// Gmail requires a client secret; Outlook's public client flow does not
	#[builder(into)]
	pub client_secret: Option<String>,
	pub device_code_url: String,
	pub token_url: String,
	pub scope: String,
}

impl OAuthClientConfig {
	#[must_use]
	pub fn gmail(client_id: String, client_secret: String) -> Self {
		Self {
			provider: Provider::Gmail,
			client_id,
			client_secret: Some(client_secret),
			device_code_url: "https://oauth2.googleapis.com/device/code".to_owned(),
			token_url: "https://oauth2.googleapis.com/token".to_owned(),
			scope: "https://mail.google.com/".to_owned(),
		}
	}

	#[must_use]
	pub fn outlook(client_id: String, tenant: &str) -> Self {
		Self {
			provider: Provider::Outlook,
			client_id,
			client_secret: None,
			device_code_url: format!(
				"https://login.microsoftonline.com/{tenant}/oauth2/v2.0/devicecode"
			),
			token_url: format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"),
			scope: "https://outlook.office.com/IMAP.AccessAsUser.All offline_access".to_owned(),
		}
	}
}

/// Returned by [`initiate`]
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
	pub device_code: String,
	pub user_code: String,
	pub verification_uri: String,
	pub expires_in: u64,
	pub interval: u64,
}

/// Returned by [`refresh`] and on a successful [`poll`]
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
	pub access_token: String,
	pub refresh_token: Option<String>,
	pub expires_in: i64,
	#[expect(dead_code, reason = "kept for parity with the wire response, unused internally")]
	pub token_type: String,
}

/// The outcome of one [`poll`] call
#[derive(Debug)]
pub enum PollOutcome {
	Ready(TokenResponse),
	Pending,
	Fatal(String),
}

#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
	#[error("request to the authorization server failed: {0}")]
	Request(#[from] reqwest::Error),
	#[error("authorization server returned a fatal error: {0}")]
	Fatal(String),
	#[error("device authorization expired before the user completed the flow")]
	Expired,
	#[error("polling exceeded the {0} iteration ceiling without completing")]
	PollCeilingReached(u32),
}

#[derive(Deserialize)]
struct RawTokenOrError {
	access_token: Option<String>,
	refresh_token: Option<String>,
	expires_in: Option<i64>,
	#[serde(default)]
	token_type: String,
	error: Option<String>,
}

/// Starts the device grant: requests a `user_code`/`device_code` pair
pub async fn initiate(
	client: &reqwest::Client,
	config: &OAuthClientConfig,
) -> Result<DeviceAuthorization, OAuthError> {
	let mut form = vec![("client_id", config.client_id.as_str()), ("scope", config.scope.as_str())];
	if let Some(secret) = &config.client_secret {
		form.push(("client_secret", secret));
	}

	let resp = client
		.post(&config.device_code_url)
		.form(&form)
		.send()
		.await?
		.json::<DeviceAuthorization>()
		.await?;

	Ok(resp)
}

/// Polls the token endpoint once
///
/// `authorization_pending`/`slow_down` map to [`PollOutcome::Pending`]; any
/// other `error` field is [`PollOutcome::Fatal`].
pub async fn poll(
	client: &reqwest::Client,
	config: &OAuthClientConfig,
	device_code: &str,
) -> Result<PollOutcome, OAuthError> {
	let form = [
		("client_id", config.client_id.as_str()),
		("device_code", device_code),
		("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
	];

	let raw = client
		.post(&config.token_url)
		.form(&form)
		.send()
		.await?
		.json::<RawTokenOrError>()
		.await?;

	match raw.error.as_deref() {
		Some("authorization_pending" | "slow_down") => Ok(PollOutcome::Pending),
		Some(other) => Ok(PollOutcome::Fatal(other.to_owned())),
		None => Ok(PollOutcome::Ready(TokenResponse {
			access_token: raw.access_token.unwrap_or_default(),
			refresh_token: raw.refresh_token,
			expires_in: raw.expires_in.unwrap_or(3600),
			token_type: raw.token_type,
		})),
	}
}

/// Drives the full polling loop: at most [`MAX_POLL_ITERATIONS`] calls to
/// [`poll`], `interval` seconds apart, honoring cancellation
pub async fn poll_until_complete(
	client: &reqwest::Client,
	config: &OAuthClientConfig,
	authorization: &DeviceAuthorization,
	cancel: &mut crate::cancellation_token::CancellationToken,
) -> Result<TokenResponse, OAuthError> {
	let interval = Duration::from_secs(authorization.interval.max(1));

	for attempt in 0..MAX_POLL_ITERATIONS {
		match crate::cancellation_token::with_cancellation(
			cancel,
			poll(client, config, &authorization.device_code),
		)
		.await
		{
			None => return Err(OAuthError::Expired),
			Some(Ok(PollOutcome::Ready(token))) => return Ok(token),
			Some(Ok(PollOutcome::Pending)) => {
				tracing::debug!(attempt, "oauth device code still pending");
			}
			Some(Ok(PollOutcome::Fatal(reason))) => return Err(OAuthError::Fatal(reason)),
			Some(Err(e)) => return Err(e),
		}

		if crate::cancellation_token::with_cancellation(cancel, tokio::time::sleep(interval))
			.await
			.is_none()
		{
			return Err(OAuthError::Expired);
		}
	}

	Err(OAuthError::PollCeilingReached(MAX_POLL_ITERATIONS))
}

/// Exchanges a refresh token for a new access token
pub async fn refresh(
	client: &reqwest::Client,
	config: &OAuthClientConfig,
	refresh_token: &str,
) -> Result<TokenResponse, OAuthError> {
	let mut form = vec![
		("client_id", config.client_id.as_str()),
		("refresh_token", refresh_token),
		("grant_type", "refresh_token"),
	];
	if let Some(secret) = &config.client_secret {
		form.push(("client_secret", secret));
	}

	let raw = client
		.post(&config.token_url)
		.form(&form)
		.send()
		.await?
		.json::<RawTokenOrError>()
		.await?;

	if let Some(error) = raw.error {
		return Err(OAuthError::Fatal(error));
	}

	Ok(TokenResponse {
		access_token: raw.access_token.unwrap_or_default(),
		refresh_token: raw.refresh_token,
		expires_in: raw.expires_in.unwrap_or(3600),
		token_type: raw.token_type,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pending_errors_are_not_fatal() {
		let raw = RawTokenOrError {
			access_token: None,
			refresh_token: None,
			expires_in: None,
			token_type: String::new(),
			error: Some("authorization_pending".to_owned()),
		};
		assert!(matches!(raw.error.as_deref(), Some("authorization_pending")));
	}
}
