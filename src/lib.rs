/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! A concurrent IMAP ingestion engine
//!
//! Ingests mail from a user's iCloud, Gmail, Outlook, or arbitrary IMAP
//! accounts and delivers every newly-received message, exactly once, as a
//! formatted instruction to an external chat agent. The crate owns the
//! long-lived IMAP connections, the IDLE push/poll reconciliation, the
//! OAuth2 device-code and refresh-token lifecycle, and the exactly-once
//! delivery boundary; everything outside that (storage, secrets, scheduling,
//! chat delivery, UI, the body sanitiser) is a host capability consumed
//! through [`host`].
//!
//! [`supervisor::Supervisor`] is the entry point: construct one with a
//! [`supervisor::HostFactory`], call [`supervisor::Supervisor::activate`] at
//! boot, feed it `on_account_added`/`on_account_deleted`/`on_fire` as the
//! host observes those events, and call [`supervisor::Supervisor::dispose`]
//! on shutdown.

pub mod cancellation_token;
pub mod dedup_store;
pub mod delivery;
pub mod email;
pub mod error;
pub mod host;
pub mod idle_session;
pub mod imap_connector;
pub mod ingestion_worker;
pub mod model;
pub mod oauth;
pub mod poll_scheduler;
pub mod provider;
pub mod retry;
pub mod supervisor;
pub mod user_registry;

pub use error::{IngestError, Result};
