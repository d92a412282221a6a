/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The poll scheduler: a periodic fallback tick per user

use std::sync::Arc;

use crate::{
	error::Result,
	host::{FirePayload, ScheduledJob, Scheduler},
	model::UserId,
};

/// Fallback interval for networks that drop IDLE or servers that miss EXISTS
pub const POLL_INTERVAL_SECS: u64 = 5 * 60;

/// Builds the job id the host scheduler registers polling under
#[must_use]
pub fn job_id(user_id: &UserId) -> String {
	format!("mail-poll-{user_id}")
}

/// Registers the 5-minute fallback poll job for `user_id`
pub async fn register(scheduler: &Arc<dyn Scheduler>, user_id: &UserId) -> Result<()> {
	scheduler
		.schedule(ScheduledJob {
			id: job_id(user_id),
			interval_secs: POLL_INTERVAL_SECS,
			user_id: user_id.clone(),
		})
		.await
}

/// Cancels the fallback poll job for `user_id`
pub async fn unregister(scheduler: &Arc<dyn Scheduler>, user_id: &UserId) -> Result<()> {
	scheduler.cancel(&job_id(user_id)).await
}

/// `true` if `payload` is a fire for `user_id`'s poll job, used by the
/// supervisor to route `on_fire` payloads to the right worker
#[must_use]
pub fn matches(payload: &FirePayload, user_id: &UserId) -> bool {
	payload.job_id == job_id(user_id) && payload.user_id == *user_id
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::fake::FakeScheduler;

	#[tokio::test]
	async fn register_schedules_a_five_minute_job() {
		let fake = FakeScheduler::new();
		let scheduled = Arc::clone(&fake.scheduled);
		let scheduler: Arc<dyn Scheduler> = Arc::new(fake);

		let user_id = UserId::from("u1");
		register(&scheduler, &user_id).await.unwrap();

		let jobs = scheduled.lock().expect("mutex poisoned");
		assert_eq!(jobs.len(), 1);
		assert_eq!(jobs[0].id, job_id(&user_id));
		assert_eq!(jobs[0].interval_secs, POLL_INTERVAL_SECS);
	}

	#[test]
	fn matches_requires_both_job_id_and_user_id() {
		let user_id = UserId::from("u1");
		let payload = FirePayload {
			job_id: job_id(&user_id),
			user_id: user_id.clone(),
		};
		assert!(matches(&payload, &user_id));
		assert!(!matches(&payload, &UserId::from("u2")));
	}
}
