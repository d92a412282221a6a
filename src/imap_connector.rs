/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! A thin wrapper over a single IMAP connection: async-imap over
//! `tokio_rustls`, with a `connect` helper that retries transient failures,
//! a SEARCH window bounded by a watermark UID, and an IDLE loop that
//! surfaces EXISTS events.

use async_imap::{Client, Session};
use futures::TryStreamExt;
use std::{
	io,
	sync::{Arc, LazyLock},
	time::Duration,
};
use tokio::net::TcpStream;
use tokio_rustls::{
	TlsConnector,
	client::TlsStream,
	rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

use crate::{
	email::{self, ParsedEmail},
	error::ImapError,
	model::Uid,
	provider::{AuthMaterial, ConnectionParams},
	retry::{RetryPolicy, retry},
};

/// Connect/greeting/socket timeouts default to 30s each
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How many of the newest matching UIDs [`fetch_since`] returns at most
pub const DEFAULT_FETCH_LIMIT: usize = 50;

static TLS_CONNECTOR: LazyLock<TlsConnector> = LazyLock::new(|| {
	let mut root_cert_store = RootCertStore::empty();
	root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

	let config = ClientConfig::builder()
		.with_root_certificates(root_cert_store)
		.with_no_client_auth();

	TlsConnector::from(Arc::new(config))
});

/// A live, authenticated IMAP session, owned by exactly one [`crate::idle_session::IdleSession`]
pub type ImapSessionHandle = Session<TlsStream<TcpStream>>;

/// A single IMAP connection, owned exclusively by one IDLE session
pub struct ImapConnector {
	params: ConnectionParams,
	timeout: Duration,
}

impl ImapConnector {
	#[must_use]
	pub fn new(params: ConnectionParams) -> Self {
		Self {
			params,
			timeout: DEFAULT_TIMEOUT,
		}
	}

	async fn dial(&self) -> Result<Client<TlsStream<TcpStream>>, ImapError> {
		tracing::trace!(host = %self.params.host, port = self.params.port, "connecting to IMAP server");

		let tcp_stream = tokio::time::timeout(
			self.timeout,
			TcpStream::connect((self.params.host.as_str(), self.params.port)),
		)
		.await
		.map_err(|_| ImapError::Timeout(self.timeout))?
		.map_err(|source| ImapError::Connect {
			host: self.params.host.clone(),
			port: self.params.port,
			source,
		})?;

		let domain = ServerName::try_from(self.params.host.as_str().to_owned())?;

		let tls_stream = tokio::time::timeout(self.timeout, TLS_CONNECTOR.connect(domain, tcp_stream))
			.await
			.map_err(|_| ImapError::Timeout(self.timeout))?
			.map_err(|source| ImapError::Connect {
				host: self.params.host.as_str().to_owned(),
				port: self.params.port,
				source,
			})?;

		Ok(Client::new(tls_stream))
	}

	async fn authenticate(&self, client: Client<TlsStream<TcpStream>>) -> Result<ImapSessionHandle, ImapError> {
		match &self.params.auth {
			AuthMaterial::Password { username, password } => {
				tracing::warn!("logging in to IMAP with a password, this is insecure");
				client
					.login(username, password)
					.await
					.map_err(|(e, _)| auth_failed(e))
			}
			AuthMaterial::XOAuth2 { username, access_token } => {
				tracing::trace!("logging in to IMAP with XOAUTH2");
				let xoauth2 = format!("user={username}\x01auth=Bearer {access_token}\x01\x01");
				client
					.authenticate("XOAUTH2", &StaticAuthenticator(xoauth2))
					.await
					.map_err(|(e, _)| auth_failed(e))
			}
		}
	}

	/// Opens a connection and logs in, retrying transient failures
	pub async fn connect(&self) -> Result<ImapSessionHandle, ImapError> {
		retry(RetryPolicy::default(), || async {
			let client = self.dial().await?;
			self.authenticate(client).await
		})
		.await
	}

	/// Connects, selects `INBOX`, disconnects
	pub async fn test(&self) -> Result<(), ImapError> {
		let mut session = self.connect().await?;
		session.select("INBOX").await.map_err(ImapError::Protocol)?;
		session.logout().await.map_err(ImapError::Protocol)?;
		Ok(())
	}

	/// `SEARCH UID (since_uid+1):*` (or `ALL` when `since_uid` is the baseline), keeping only
	/// the newest `limit` messages, then `UID FETCH`es and parses each one
	///
	/// A message that fails to parse is skipped; the fetch never fails wholesale
	/// because of one bad message.
	pub async fn fetch_since(
		&self,
		since_uid: Uid,
		limit: usize,
	) -> Result<Vec<ParsedEmail>, ImapError> {
		retry(RetryPolicy::default(), || async {
			self.fetch_since_once(since_uid, limit).await
		})
		.await
	}

	async fn fetch_since_once(&self, since_uid: Uid, limit: usize) -> Result<Vec<ParsedEmail>, ImapError> {
		let mut session = self.connect().await?;
		session.select("INBOX").await.map_err(ImapError::Protocol)?;

		let search = if since_uid == Uid::BASELINE {
			"ALL".to_owned()
		} else {
			format!("UID {}:*", since_uid.0 + 1)
		};

		let mut uids: Vec<u32> = session
			.uid_search(&search)
			.await
			.map_err(ImapError::Protocol)?
			.into_iter()
			.filter(|&uid| since_uid == Uid::BASELINE || uid > since_uid.0)
			.collect();
		uids.sort_unstable();

		if uids.len() > limit {
			uids = uids.split_off(uids.len() - limit);
		}

		if uids.is_empty() {
			session.logout().await.map_err(ImapError::Protocol)?;
			return Ok(Vec::new());
		}

		let uid_set = uids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");

		let fetches: Vec<_> = session
			.uid_fetch(&uid_set, "BODY[]")
			.await
			.map_err(ImapError::Protocol)?
			.try_collect()
			.await
			.map_err(ImapError::Protocol)?;

		let mut emails = Vec::with_capacity(fetches.len());
		for fetch in fetches {
			let Some(body) = fetch.body() else {
				tracing::warn!("IMAP server returned a fetch result with no body, skipping");
				continue;
			};
			let Some(uid) = fetch.uid else {
				tracing::warn!("IMAP server returned a fetch result with no UID, skipping");
				continue;
			};

			match email::parse(body, Uid(uid)) {
				Ok(parsed) => emails.push(parsed),
				Err(e) => tracing::warn!(uid, "skipping email that failed to parse: {e}"),
			}
		}

		session.logout().await.map_err(ImapError::Protocol)?;

		emails.sort_by_key(|e| e.uid.0);
		Ok(emails)
	}

	/// Enters IDLE and invokes `on_exists` for every untagged EXISTS response,
	/// returning the session (recovered via `DONE`) once the server's IDLE
	/// response stream ends or a hard error occurs
	///
	/// `on_exists` must not block: it only needs to send a one-shot
	/// "new mail" signal to the owning [`crate::idle_session::IdleSession`].
	pub async fn idle_listen(
		&self,
		session: ImapSessionHandle,
		mut on_exists: impl FnMut(),
		max_duration: Duration,
	) -> Result<ImapSessionHandle, ImapError> {
		let mut idle = session.idle();
		idle.init().await.map_err(ImapError::Protocol)?;

		let (idle_wait, _stop) = idle.wait_with_timeout(max_duration);

		let wait_result = match idle_wait.await {
			Ok(async_imap::extensions::idle::IdleResponse::NewData(data)) => {
				if looks_like_exists(&data) {
					on_exists();
				}
				Ok(())
			}
			Ok(async_imap::extensions::idle::IdleResponse::Timeout) => Ok(()),
			Ok(async_imap::extensions::idle::IdleResponse::ManualInterrupt) => Ok(()),
			Err(e) => Err(ImapError::Protocol(e)),
		};

		let session = idle.done().await.map_err(ImapError::Protocol)?;
		wait_result.map(|()| session)
	}
}

fn looks_like_exists(raw: &[u8]) -> bool {
	String::from_utf8_lossy(raw).contains("EXISTS")
}

fn auth_failed(e: async_imap::error::Error) -> ImapError {
	ImapError::AuthenticationFailed {
		code: None,
		text: e.to_string(),
	}
}

struct StaticAuthenticator(String);

impl async_imap::Authenticator for StaticAuthenticator {
	type Response = String;

	fn process(&mut self, _challenge: &[u8]) -> Self::Response {
		self.0.clone()
	}
}

impl From<io::Error> for ImapError {
	fn from(source: io::Error) -> Self {
		Self::Connect {
			host: String::new(),
			port: 0,
			source,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exists_detection_is_case_sensitive_to_the_wire_keyword() {
		assert!(looks_like_exists(b"* 4 EXISTS\r\n"));
		assert!(!looks_like_exists(b"* OK IDLE terminated\r\n"));
	}
}
