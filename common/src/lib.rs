// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared by every component of the access-control subsystem
//!
//! This crate deliberately has no opinion about storage backends or
//! transports.  It defines the data model (subjects, policies, roles, groups,
//! project policy bindings, and the positional rule tuple that encodes policy
//! state on disk) along with the error taxonomy used throughout the
//! workspace.

pub mod api;
