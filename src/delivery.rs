/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The delivery formatter + sink

use std::sync::Arc;

use crate::{
	email::ParsedEmail,
	host::ChatSink,
	model::{Account, Settings, UserId},
};

/// Truncate the sanitised body at this many chars, appending `…`
pub const BODY_TRUNCATE_CHARS: usize = 2000;

/// Renders one [`ParsedEmail`] into the `[New Email]` instruction block
#[must_use]
pub fn format_instruction(email: &ParsedEmail, account: &Account, settings: &Settings) -> String {
	let from = match &email.from_name {
		Some(name) => format!("{name} <{}>", email.from_addr),
		None => email.from_addr.clone(),
	};

	let to = if email.to.is_empty() {
		"(unknown)".to_owned()
	} else {
		email.to.join(", ")
	};

	let subject = email.subject.as_deref().unwrap_or("(No subject)");
	let date = email.date.to_rfc2822();
	let body = truncate_body(&email.body);

	let mut block = format!(
		"[New Email]\nFrom: {from}\nTo: {to} ({})\nSubject: {subject}\nDate: {date}\nEmail content:\n---\n{body}\n---",
		account.display_name
	);

	if !settings.instruction.trim().is_empty() {
		block.push('\n');
		block.push_str(settings.instruction.trim());
	}

	block
}

fn truncate_body(body: &str) -> String {
	if body.chars().count() <= BODY_TRUNCATE_CHARS {
		return body.to_owned();
	}
	let mut truncated: String = body.chars().take(BODY_TRUNCATE_CHARS).collect();
	truncated.push('…');
	truncated
}

/// Posts a rendered instruction once, fire-and-forget
///
/// A failed post is logged at warn and does not roll back the caller's claim:
/// at-most-once delivery after a successful `try_claim` is the contract.
pub async fn deliver(sink: &Arc<dyn ChatSink>, user_id: &UserId, instruction: &str) {
	if let Err(e) = sink.append_instruction(user_id, instruction).await {
		tracing::warn!(user_id = %user_id, "failed to post delivered email to chat sink: {e}");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{AccountId, AuthKind, ProviderTag, Uid};

	fn account() -> Account {
		Account {
			id: AccountId::from("a1"),
			provider: ProviderTag::Icloud,
			display_name: "Personal iCloud".to_owned(),
			email: "me@icloud.com".to_owned(),
			imap_host: None,
			imap_port: None,
			security: None,
			auth: AuthKind::Password,
			enabled: true,
			last_sync: None,
			last_error: None,
		}
	}

	fn email(body: &str) -> ParsedEmail {
		ParsedEmail {
			uid: Uid(13),
			message_id: "m13@x".to_owned().into(),
			from_name: Some("Jane Doe".to_owned()),
			from_addr: "jane@example.com".to_owned(),
			to: vec!["me@icloud.com".to_owned()],
			subject: Some("Hello".to_owned()),
			date: chrono::Utc::now(),
			body: body.to_owned(),
		}
	}

	#[test]
	fn formats_the_new_email_block() {
		let text = format_instruction(&email("Hi there"), &account(), &Settings::default());
		assert!(text.starts_with("[New Email]\n"));
		assert!(text.contains("From: Jane Doe <jane@example.com>"));
		assert!(text.contains("To: me@icloud.com (Personal iCloud)"));
		assert!(text.contains("Subject: Hello"));
		assert!(text.contains("Hi there"));
	}

	#[test]
	fn missing_subject_uses_the_placeholder() {
		let mut mail = email("body");
		mail.subject = None;
		let text = format_instruction(&mail, &account(), &Settings::default());
		assert!(text.contains("Subject: (No subject)"));
	}

	#[test]
	fn appends_the_instruction_when_present() {
		let settings = Settings {
			instruction: "Summarize in one line.".to_owned(),
		};
		let text = format_instruction(&email("body"), &account(), &settings);
		assert!(text.ends_with("Summarize in one line."));
	}

	#[test]
	fn truncates_long_bodies_with_an_ellipsis_sentinel() {
		let long_body = "x".repeat(BODY_TRUNCATE_CHARS + 500);
		let text = format_instruction(&email(&long_body), &account(), &Settings::default());
		assert!(text.contains('…'));
		assert!(!text.contains(&"x".repeat(BODY_TRUNCATE_CHARS + 1)));
	}
}
