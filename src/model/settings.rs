/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The per-user [`Settings`] entity

use serde::{Deserialize, Serialize};

/// Created lazily on first read with an empty instruction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
	/// Free-form prompt appended to every delivered email
	pub instruction: String,
}
