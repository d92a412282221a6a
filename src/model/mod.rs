/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The data model: `Account`, `Credentials`, `Processed`, `Watermark`
//! (derived), `Settings`, `EditState`, and the ids that tie them to a
//! user/account scope.

pub mod account;
pub mod credentials;
pub mod edit_state;
pub mod ids;
pub mod processed;
pub mod settings;

pub use account::{Account, AuthKind, ProviderTag, Security};
pub use credentials::Credentials;
pub use edit_state::{EditState, EditStateMap, OAuthStatus};
pub use ids::{AccountId, MessageId, Uid, UserId};
pub use processed::ProcessedRecord;
pub use settings::Settings;
