/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! A fetched email, parsed down to the fields the delivery formatter needs
//!
//! The body sanitiser (HTML→text, signature/quote stripping) is an external
//! collaborator: this module only extracts headers/body from raw RFC 822
//! bytes via `mailparse`; cleanup rules are out of scope here.

use mailparse::ParsedMail;

use crate::model::{MessageId, Uid};

/// A fetched, minimally-parsed email, the shape the delivery formatter consumes
#[derive(Debug, Clone)]
pub struct ParsedEmail {
	pub uid: Uid,
	pub message_id: MessageId,
	pub from_name: Option<String>,
	pub from_addr: String,
	pub to: Vec<String>,
	pub subject: Option<String>,
	pub date: chrono::DateTime<chrono::Utc>,
	pub body: String,
}

/// Parses raw RFC 822 bytes into a [`ParsedEmail`]
///
/// A single message that fails to parse is skipped by the caller rather
/// than failing the whole fetch; this function simply returns an error for
/// that message.
pub fn parse(raw: &[u8], uid: Uid) -> Result<ParsedEmail, mailparse::MailParseError> {
	let mail = mailparse::parse_mail(raw)?;
	Ok(parse_parsed(&mail, uid))
}

fn parse_parsed(mail: &ParsedMail<'_>, uid: Uid) -> ParsedEmail {
	let header = |name: &str| -> Option<String> {
		mail.headers
			.iter()
			.find(|h| h.get_key_ref().eq_ignore_ascii_case(name))
			.map(|h| h.get_value())
	};

	let message_id = header("Message-ID")
		.map(|raw| raw.trim_start_matches('<').trim_end_matches('>').to_owned())
		.unwrap_or_else(|| format!("generated-{uid}@no-message-id"));

	let (from_name, from_addr) = header("From")
		.as_deref()
		.map(split_display_name)
		.unwrap_or((None, String::new()));

	let to = header("To")
		.map(|raw| raw.split(',').map(|s| s.trim().to_owned()).collect())
		.unwrap_or_default();

	let date = header("Date")
		.and_then(|raw| chrono::DateTime::parse_from_rfc2822(raw.trim()).ok())
		.map(|dt| dt.with_timezone(&chrono::Utc))
		.unwrap_or_else(chrono::Utc::now);

	let body = body_text(mail);

	ParsedEmail {
		uid,
		message_id: MessageId::from(message_id),
		from_name,
		from_addr,
		to,
		subject: header("Subject"),
		date,
		body,
	}
}

fn split_display_name(raw: &str) -> (Option<String>, String) {
	if let Some(open) = raw.find('<') {
		if let Some(close) = raw[open..].find('>') {
			let name = raw[..open].trim().trim_matches('"').to_owned();
			let addr = raw[open + 1..open + close].trim().to_owned();
			return (if name.is_empty() { None } else { Some(name) }, addr);
		}
	}
	(None, raw.trim().to_owned())
}

fn body_text(mail: &ParsedMail<'_>) -> String {
	let part = if mail.subparts.is_empty() {
		mail
	} else {
		mail.subparts
			.iter()
			.find(|p| p.ctype.mimetype == "text/plain")
			.or_else(|| mail.subparts.iter().find(|p| p.ctype.mimetype == "text/html"))
			.unwrap_or(&mail.subparts[0])
	};

	part.get_body().unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	const RAW: &str = "From: Jane Doe <jane@example.com>\r\n\
To: me@example.com, other@example.com\r\n\
Subject: Hello there\r\n\
Message-ID: <abc123@example.com>\r\n\
Date: Mon, 1 Jan 2024 10:00:00 +0000\r\n\
\r\n\
Hi there, this is the body.\r\n";

	#[test]
	fn parses_headers_and_body() {
		let email = parse(RAW.as_bytes(), Uid(42)).unwrap();
		assert_eq!(email.uid, Uid(42));
		assert_eq!(email.message_id.as_str(), "abc123@example.com");
		assert_eq!(email.from_name.as_deref(), Some("Jane Doe"));
		assert_eq!(email.from_addr, "jane@example.com");
		assert_eq!(email.to, vec!["me@example.com", "other@example.com"]);
		assert_eq!(email.subject.as_deref(), Some("Hello there"));
		assert!(email.body.contains("this is the body"));
	}

	#[test]
	fn missing_message_id_gets_a_generated_one() {
		let raw = "From: a@b.com\r\nSubject: x\r\n\r\nbody\r\n";
		let email = parse(raw.as_bytes(), Uid(7)).unwrap();
		assert!(email.message_id.as_str().contains("generated-7"));
	}
}
