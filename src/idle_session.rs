/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The IDLE session state machine: one per (user, account), cycling through
//! connect, idle, and a capped exponential-style backoff on failure.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
	cancellation_token::{CancellationToken, with_cancellation},
	imap_connector::{ImapConnector, ImapSessionHandle},
	model::AccountId,
};

/// Refresh IDLE before the server's ~29 min timeout
pub const IDLE_REFRESH_INTERVAL: Duration = Duration::from_secs(25 * 60);

/// Wait between reconnect attempts while in [`State::Backoff`]
pub const BACKOFF_WAIT: Duration = Duration::from_secs(5);

/// Give up after this many consecutive reconnect failures
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// The IDLE session's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Connecting,
	Idling,
	Backoff,
}

/// Why [`IdleSession::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// The supervisor cancelled this session
	Stopped,
	/// Reconnection failed [`MAX_RECONNECT_ATTEMPTS`] times in a row
	Dead,
}

/// One account's IDLE loop. Owns exactly one IMAP connection at a time.
pub struct IdleSession {
	account_id: AccountId,
	connector: ImapConnector,
	/// one-shot "new mail" signal into the ingestion worker
	new_mail: mpsc::UnboundedSender<AccountId>,
	reconnect_attempts: u32,
}

impl IdleSession {
	#[must_use]
	pub fn new(
		account_id: AccountId,
		connector: ImapConnector,
		new_mail: mpsc::UnboundedSender<AccountId>,
	) -> Self {
		Self {
			account_id,
			connector,
			new_mail,
			reconnect_attempts: 0,
		}
	}

	/// Drives the session until cancellation or [`Outcome::Dead`]
	#[tracing::instrument(skip(self, cancel), fields(account_id = %self.account_id))]
	pub async fn run(&mut self, mut cancel: CancellationToken) -> Outcome {
		let mut state = State::Connecting;
		let mut session: Option<ImapSessionHandle> = None;

		loop {
			if cancel.is_cancelled() {
				if let Some(mut s) = session.take() {
					let _ = s.logout().await;
				}
				tracing::info!(account_id = %self.account_id, "IDLE session stopped");
				return Outcome::Stopped;
			}

			match state {
				State::Connecting | State::Backoff => {
					if state == State::Backoff
						&& with_cancellation(&mut cancel, tokio::time::sleep(BACKOFF_WAIT))
							.await
							.is_none()
					{
						tracing::info!(account_id = %self.account_id, "IDLE session stopped");
						return Outcome::Stopped;
					}

					match with_cancellation(&mut cancel, self.connect_and_select()).await {
						None => {
							tracing::info!(account_id = %self.account_id, "IDLE session stopped");
							return Outcome::Stopped;
						}
						Some(Ok(s)) => {
							session = Some(s);
							self.reconnect_attempts = 0;
							state = State::Idling;
						}
						Some(Err(e)) => {
							self.reconnect_attempts += 1;
							tracing::warn!(
								account_id = %self.account_id,
								attempt = self.reconnect_attempts,
								"IDLE reconnect failed: {e}"
							);
							if self.reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
								tracing::warn!(account_id = %self.account_id, "IDLE session declared dead");
								return Outcome::Dead;
							}
							state = State::Backoff;
						}
					}
				}

				State::Idling => {
					let s = session.take().expect("Idling state always holds a session");
					let new_mail = self.new_mail.clone();
					let account_id = self.account_id.clone();

					let idle_result = with_cancellation(
						&mut cancel,
						self.connector.idle_listen(
							s,
							move || {
								let _ = new_mail.send(account_id.clone());
							},
							IDLE_REFRESH_INTERVAL,
						),
					)
					.await;

					match idle_result {
						None => {
							tracing::info!(account_id = %self.account_id, "IDLE session stopped");
							return Outcome::Stopped;
						}
						Some(Ok(s)) => {
							session = Some(s);
							self.reconnect_attempts = 0;
							// stays Idling: idle_listen returns once per refresh tick or EXISTS
						}
						Some(Err(e)) => {
							tracing::warn!(account_id = %self.account_id, "IDLE loop error, reconnecting: {e}");
							state = State::Backoff;
						}
					}
				}
			}
		}
	}

	async fn connect_and_select(&self) -> Result<ImapSessionHandle, crate::error::ImapError> {
		let mut session = self.connector.connect().await?;
		session.select("INBOX").await.map_err(crate::error::ImapError::Protocol)?;
		Ok(session)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_and_refresh_constants_match_the_transition_table() {
		assert_eq!(BACKOFF_WAIT, Duration::from_secs(5));
		assert_eq!(IDLE_REFRESH_INTERVAL, Duration::from_secs(25 * 60));
		assert_eq!(MAX_RECONNECT_ATTEMPTS, 5);
	}
}
