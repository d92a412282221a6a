/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Crate-wide error type and the retry classification used by [`crate::retry`]

use crate::{oauth::OAuthError, provider::ProviderError};

/// How a failure should be treated by the retry helper and the IDLE state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Timeouts, connection reset/refused, DNS failures, "socket hang up" - worth retrying
	Transient,
	/// IMAP LOGIN rejection or a refresh token the authorization server no longer honors
	Authentication,
	/// A single message failed to parse; the batch continues
	Parse,
	/// Missing user id, mismatched credential type, and other invariants a caller violated
	Programmer,
}

/// Crate-wide error type
#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
	#[error(transparent)]
	Imap(#[from] ImapError),

	#[error(transparent)]
	Provider(#[from] ProviderError),

	#[error(transparent)]
	OAuth(#[from] OAuthError),

	#[error("failed to parse email: {0}")]
	Parse(#[from] mailparse::MailParseError),

	#[error("storage operation failed: {0}")]
	Storage(String),

	#[error("{what} is missing for user {user_id}")]
	Programmer { user_id: String, what: &'static str },
}

impl IngestError {
	/// Classifies this error for the retry helper and the error-handling policy
	#[must_use]
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Imap(e) => e.kind(),
			Self::Provider(_) => ErrorKind::Programmer,
			Self::OAuth(_) => ErrorKind::Authentication,
			Self::Parse(_) => ErrorKind::Parse,
			Self::Storage(_) => ErrorKind::Transient,
			Self::Programmer { .. } => ErrorKind::Programmer,
		}
	}
}

/// Errors raised by the IMAP connector
#[expect(missing_docs, reason = "error message is self-documenting")]
#[derive(thiserror::Error, Debug)]
pub enum ImapError {
	#[error("failed to connect to {host}:{port}")]
	Connect {
		host: String,
		port: u16,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to resolve the IMAP server's domain name")]
	InvalidServerAddress(#[from] tokio_rustls::rustls::pki_types::InvalidDnsNameError),

	#[error("authentication failed: {text}")]
	AuthenticationFailed { code: Option<String>, text: String },

	#[error("IMAP protocol error: {0}")]
	Protocol(#[from] async_imap::error::Error),

	#[error("the connection timed out after {0:?}")]
	Timeout(std::time::Duration),
}

impl ImapError {
	/// Classifies this error into the shared error kinds
	#[must_use]
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Connect { .. } | Self::Timeout(_) => ErrorKind::Transient,
			Self::InvalidServerAddress(_) => ErrorKind::Programmer,
			Self::AuthenticationFailed { .. } => ErrorKind::Authentication,
			Self::Protocol(e) => {
				if is_transient_message(&e.to_string()) {
					ErrorKind::Transient
				} else {
					ErrorKind::Authentication
				}
			}
		}
	}

	/// `true` when the IMAP LOGIN/AUTHENTICATE itself was rejected by the server
	#[must_use]
	pub fn is_authentication_failure(&self) -> bool {
		matches!(self, Self::AuthenticationFailed { .. })
	}
}

/// Matches the transient-fault vocabulary: timeouts, connection reset/refused,
/// DNS failures, host unreachable, "socket hang up".
///
/// Classification is message-based rather than variant-based because the
/// underlying IMAP and TCP error types don't expose a transient/fatal bit of
/// their own.
pub(crate) fn is_transient_message(text: &str) -> bool {
	let text = text.to_ascii_lowercase();
	[
		"timed out",
		"timeout",
		"connection reset",
		"connection refused",
		"broken pipe",
		"dns",
		"name resolution",
		"host unreachable",
		"network unreachable",
		"socket hang up",
		"unexpected eof",
	]
	.iter()
	.any(|needle| text.contains(needle))
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, IngestError>;
