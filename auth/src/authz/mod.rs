// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Authorization subsystem
//!
//! ## Authorization basics
//!
//! Our external authorization policy is expressed in terms of role-based
//! access control (RBAC): a *subject* can perform an *action* on an *object*
//! if some policy statement matching the request grants it, either because
//! the statement names the subject directly or because the subject reaches
//! the statement's subject through the role-inheritance graph.  Let's unpack
//! that.
//!
//! - **subject** is a user or a group, identified within a tenant.
//! - **object** is usually an API resource path, like `"ns/x"`.
//! - **action** is one of a handful of verbs like `"get"` or `"delete"`.
//! - **statement** is a `(subject, object, action, effect)` tuple, where the
//!   subject slot usually names a role and the object/action slots may use
//!   wildcards (see [`matcher`]).
//! - **role** is a node in the inheritance graph.  Granting user `u1` role
//!   `rol-admin`, and role `rol-admin` role `rol-base`, gives `u1` every
//!   statement written against `rol-base` -- transitively, bounded by the
//!   configured maximum hierarchy depth.
//!
//! All graph edges and statements are scoped by a **domain**: the tenant id
//! for platform-scoped policy, or `"<tenant>/<project>"` for project-scoped
//! policy.  The empty domain is a valid global scope.
//!
//! ## Decision rule
//!
//! A request is allowed iff at least one matching statement has effect
//! `Allow` and no matching statement has effect `Deny`.  A single matching
//! deny overrides any number of allows.  If nothing matches, the decision is
//! [`Decision::NoOpinion`], which callers must treat as deny-by-default --
//! it is deliberately distinct from an explicit deny so that a surrounding
//! layer can consult another authority.
//!
//! ## Persistence
//!
//! The in-memory engine is synchronized with the rule persistence backend by
//! the [`adapter::RuleAdapter`]: a full replay at startup (`load_policy`),
//! incremental single-tuple writes on every bind/unbind (the "auto-save"
//! path), and a destructive full rewrite (`save_policy`) for rebuilds.  The
//! [`enforcer::Enforcer`] facade wraps all of this behind a readers-writer
//! lock so that concurrent authorization checks never observe a torn graph
//! mutation.

pub mod adapter;
pub mod engine;
pub mod enforcer;
pub mod matcher;
pub mod role_manager;

pub use adapter::RuleAdapter;
pub use engine::AccessRequest;
pub use engine::Decision;
pub use engine::Engine;
pub use engine::PolicyStatement;
pub use enforcer::Enforcer;
pub use role_manager::RoleManager;
pub use role_manager::DEFAULT_MAX_HIERARCHY_DEPTH;
