/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! A single retry/backoff helper reused wherever fragile I/O happens: IMAP
//! connects/searches/fetches and OAuth2 HTTP calls.

use rand::Rng;
use std::time::Duration;

use crate::error::ErrorKind;

/// Default retry policy for [`retry`]: 3 attempts, base 1s, capped at 30s, up to 1s jitter
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	/// Maximum number of attempts, including the first
	pub max_attempts: u32,
	/// Base of the exponential backoff (`base * 2^attempt`)
	pub base: Duration,
	/// Upper bound on any single wait
	pub cap: Duration,
	/// Extra random jitter added to each wait, uniformly in `[0, jitter]`
	pub jitter: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base: Duration::from_secs(1),
			cap: Duration::from_secs(30),
			jitter: Duration::from_secs(1),
		}
	}
}

impl RetryPolicy {
	fn backoff_for_attempt(&self, attempt: u32) -> Duration {
		let exp = self.base.saturating_mul(1 << attempt.min(30));
		let capped = exp.min(self.cap);
		let jitter_secs = self.jitter.as_secs_f64() * rand::rng().random::<f64>();
		capped.saturating_add(Duration::from_secs_f64(jitter_secs))
	}
}

/// Runs `op`, retrying up to `policy.max_attempts` times while `is_transient(&err) == true`.
///
/// The first non-transient error is returned immediately without retrying.
/// Exhausting the attempt budget returns the last error observed.
pub async fn retry<T, E, Op, Fut>(policy: RetryPolicy, mut op: Op) -> Result<T, E>
where
	Op: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: Classify,
{
	let mut attempt = 0;
	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(err) if err.kind() == ErrorKind::Transient && attempt + 1 < policy.max_attempts => {
				let wait = policy.backoff_for_attempt(attempt);
				tracing::warn!(
					attempt = attempt + 1,
					max_attempts = policy.max_attempts,
					?wait,
					"transient error, retrying: {err}",
					err = DisplayErr(&err)
				);
				tokio::time::sleep(wait).await;
				attempt += 1;
			}
			Err(err) => return Err(err),
		}
	}
}

/// Lets [`retry`] classify arbitrary error types without depending on [`crate::error::IngestError`] directly
pub trait Classify {
	/// Classifies the error for the retry loop
	fn kind(&self) -> ErrorKind;
}

impl Classify for crate::error::IngestError {
	fn kind(&self) -> ErrorKind {
		crate::error::IngestError::kind(self)
	}
}

impl Classify for crate::error::ImapError {
	fn kind(&self) -> ErrorKind {
		crate::error::ImapError::kind(self)
	}
}

struct DisplayErr<'a, E>(&'a E);

impl<E: std::fmt::Display> std::fmt::Display for DisplayErr<'_, E> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[derive(Debug, thiserror::Error)]
	#[error("boom")]
	struct Boom(ErrorKind);

	impl Classify for Boom {
		fn kind(&self) -> ErrorKind {
			self.0
		}
	}

	#[tokio::test(start_paused = true)]
	async fn retries_transient_errors_up_to_the_limit() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy {
			max_attempts: 3,
			..Default::default()
		};

		let result: Result<(), Boom> = retry(policy, || {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err(Boom(ErrorKind::Transient)) }
		})
		.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 3, "should stop after max_attempts");
	}

	#[tokio::test]
	async fn non_transient_errors_fail_on_the_first_attempt() {
		let calls = AtomicU32::new(0);

		let result: Result<(), Boom> = retry(RetryPolicy::default(), || {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err(Boom(ErrorKind::Authentication)) }
		})
		.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn succeeds_after_a_transient_retry() {
		let calls = AtomicU32::new(0);

		let result: Result<u32, Boom> = retry(RetryPolicy::default(), || {
			let n = calls.fetch_add(1, Ordering::SeqCst);
			async move {
				if n == 0 {
					Err(Boom(ErrorKind::Transient))
				} else {
					Ok(42)
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), 42);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
