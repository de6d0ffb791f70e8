// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authorization engine for the access-control subsystem
//!
//! This crate answers "may subject S perform action A on resource O within
//! domain D" and maintains the role-inheritance graph and durable rule
//! records that back those answers.  It also defines the narrow storage
//! seams ([`storage`]) through which the rest of the workspace talks to the
//! surrounding platform, and the operation context ([`context::OpContext`])
//! that carries a logger into every storage-facing call.

pub mod authz;
pub mod context;
pub mod storage;
