/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`CancellationToken`] type
//!
//! The supervisor owns one of these per ingestion worker and per IDLE
//! session; cancelling it propagates to every blocking wait those tasks are
//! suspended on.

use tokio::sync::watch;

/// The receiving end of a channel that is notified when a task should stop
#[derive(Clone, Debug)]
pub struct CancellationToken(watch::Receiver<()>);

impl CancellationToken {
	/// Creates a new [`CancellationToken`] and returns the sending half of the underlying channel
	#[must_use]
	pub fn new() -> (Self, watch::Sender<()>) {
		let (tx, rx) = watch::channel(());
		(Self(rx), tx)
	}

	/// Blocks the current task until the sender drops or calls `send`
	pub async fn cancelled(&mut self) {
		// a closed channel also means "cancelled": the sender was dropped
		_ = self.0.changed().await;
	}

	/// Checks for cancellation without blocking
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.0.has_changed().unwrap_or(true)
	}
}

/// Races `fut` against cancellation. Returns `None` if `token` fired first.
pub async fn with_cancellation<F, T>(token: &mut CancellationToken, fut: F) -> Option<T>
where
	F: std::future::Future<Output = T>,
{
	tokio::select! {
		biased;
		() = token.cancelled() => None,
		out = fut => Some(out),
	}
}
