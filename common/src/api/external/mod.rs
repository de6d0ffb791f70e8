// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures and related facilities for representing resources in the
//! access-control API
//!
//! These types are the interchange representation used between the policy
//! engine, the binding manager, the lifecycle controller, and the storage
//! layer.  They are transport-agnostic: the HTTP service layer that consumes
//! this workspace defines its own view types.

mod error;

pub use error::Error;
pub use error::InternalContext;
pub use error::LookupType;
pub use error::ValidationErrors;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;
use uuid::Uuid;

/// Result of a create operation for the specified type
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation for the specified type
pub type DeleteResult = Result<(), Error>;
/// Result of a list operation that returns a vector
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation for the specified type
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation for the specified type
pub type UpdateResult<T> = Result<T, Error>;

/// Generation numbers stored in the database, used for optimistic concurrency
/// control
///
/// A resource's generation is bumped on every successful update.  Conditional
/// updates and deletes name the generation they read; the store rejects the
/// operation with [`Error::Conflict`] if the stored generation has moved on.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Generation(u64);

impl Generation {
    pub fn new() -> Generation {
        Generation(1)
    }

    pub fn next(&self) -> Generation {
        // It should technically be an operational error if this wraps or even
        // exceeds the value allowed by an i64.  But it seems unlikely enough
        // to happen in practice that we can probably feel safe with this.
        let next_gen = self.0 + 1;
        assert!(next_gen <= u64::try_from(i64::MAX).unwrap());
        Generation(next_gen)
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation::new()
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        f.write_str(&self.0.to_string())
    }
}

/// Identifies a type of API resource
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum ResourceType {
    Tenant,
    Project,
    Policy,
    Role,
    Group,
    ProjectPolicyBinding,
    RuleRecord,
    User,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(
            f,
            "{}",
            match self {
                ResourceType::Tenant => "tenant",
                ResourceType::Project => "project",
                ResourceType::Policy => "policy",
                ResourceType::Role => "role",
                ResourceType::Group => "group",
                ResourceType::ProjectPolicyBinding => "project policy binding",
                ResourceType::RuleRecord => "rule record",
                ResourceType::User => "user",
            }
        )
    }
}

/// Lifecycle phase of a policy-bearing resource
///
/// Resources begin `Active`.  The first delete request moves them to
/// `Terminating`; they remain visible in that state until every finalizer has
/// been cleared, at which point a subsequent delete removes them physically.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum Phase {
    Active,
    Terminating,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            Phase::Active => f.write_str("Active"),
            Phase::Terminating => f.write_str("Terminating"),
        }
    }
}

/// Whether a policy applies platform-wide or is templated per-project
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum PolicyScope {
    Platform,
    Project,
}

/// Whether a policy is operator-defined or shipped with the system
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum PolicyType {
    Custom,
    Default,
}

/// Outcome attached to a policy statement
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum Effect {
    Allow,
    Deny,
}

impl Display for Effect {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            Effect::Allow => f.write_str("allow"),
            Effect::Deny => f.write_str("deny"),
        }
    }
}

impl Effect {
    pub fn parse(s: &str) -> Result<Effect, Error> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(Error::InvalidValue {
                label: String::from("effect"),
                message: format!("unrecognized effect {:?}", other),
            }),
        }
    }
}

/// A user or group reference, by id and/or name
///
/// Subjects inside a binding may be partially specified (id without name, or
/// name without id) pending resolution against the identity directory.  Set
/// membership compares by id when both sides have one, falling back to name.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Subject {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl Subject {
    pub fn by_id<S: Into<String>>(id: S) -> Subject {
        Subject { id: Some(id.into()), name: None }
    }

    pub fn by_name<S: Into<String>>(name: S) -> Subject {
        Subject { id: None, name: Some(name.into()) }
    }

    pub fn new<S: Into<String>, T: Into<String>>(id: S, name: T) -> Subject {
        Subject { id: Some(id.into()), name: Some(name.into()) }
    }

    /// Returns whether `self` and `other` identify the same subject
    ///
    /// Ids are authoritative when both sides have one.  Otherwise we compare
    /// names, which is the best we can do for a subject that has not been
    /// resolved yet.
    pub fn same_subject(&self, other: &Subject) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => match (&self.name, &other.name) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// The identifier used for role-graph edges: the id when resolved, else
    /// the name
    pub fn graph_key(&self) -> Option<&str> {
        self.id.as_deref().or(self.name.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none()
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match (&self.id, &self.name) {
            (Some(id), Some(name)) => write!(f, "{} ({})", id, name),
            (Some(id), None) => f.write_str(id),
            (None, Some(name)) => f.write_str(name),
            (None, None) => f.write_str("<empty subject>"),
        }
    }
}

/// Merges `additions` into `current`, preserving order and dropping subjects
/// already present
///
/// Returns the new set.  The input is never mutated in place; callers assign
/// the result over the old set in one step.
pub fn subjects_union(
    current: &[Subject],
    additions: &[Subject],
) -> Vec<Subject> {
    let mut merged = current.to_vec();
    for subject in additions {
        if !merged.iter().any(|s| s.same_subject(subject)) {
            merged.push(subject.clone());
        }
    }
    merged
}

/// Removes every subject in `removals` from `current`, returning the new set
///
/// Removing a subject that is not present is a no-op.
pub fn subjects_difference(
    current: &[Subject],
    removals: &[Subject],
) -> Vec<Subject> {
    current
        .iter()
        .filter(|s| !removals.iter().any(|r| r.same_subject(s)))
        .cloned()
        .collect()
}

/// Returns the subjects of `current` that `selection` names
///
/// The returned subjects come from `current`, so they carry whatever was
/// resolved when they were stored (notably the id, even when `selection`
/// names them only by name).
pub fn subjects_intersection(
    current: &[Subject],
    selection: &[Subject],
) -> Vec<Subject> {
    current
        .iter()
        .filter(|s| selection.iter().any(|r| r.same_subject(s)))
        .cloned()
        .collect()
}

/// One statement of a policy: the actions it covers, the resources they apply
/// to, and whether matching requests are allowed or denied
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Statement {
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub effect: Effect,
}

/// Metadata common to every durable resource in this subsystem
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ObjectIdentity {
    pub id: String,
    /// immutable after creation; cross-tenant references are rejected at
    /// bind time
    pub tenant_id: String,
    pub generation: Generation,
    /// cleanup obligations that must be cleared before physical deletion
    pub finalizers: Vec<String>,
    pub phase: Phase,
    /// stamped when deletion is first requested; the object stays visible
    /// until its finalizers empty out
    pub time_deleted: Option<DateTime<Utc>>,
}

impl ObjectIdentity {
    pub fn new<S: Into<String>, T: Into<String>>(
        id: S,
        tenant_id: T,
    ) -> ObjectIdentity {
        ObjectIdentity {
            id: id.into(),
            tenant_id: tenant_id.into(),
            generation: Generation::new(),
            finalizers: Vec::new(),
            phase: Phase::Active,
            time_deleted: None,
        }
    }

    pub fn with_finalizers(
        mut self,
        finalizers: Vec<String>,
    ) -> ObjectIdentity {
        self.finalizers = finalizers;
        self
    }
}

/// A named bundle of one statement applied to a set of bound subjects
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Policy {
    pub identity: ObjectIdentity,
    pub scope: PolicyScope,
    pub policy_type: PolicyType,
    pub statement: Statement,
    /// Platform-scoped policies bind subjects directly.  Project-scoped
    /// policies are shared templates: their subject sets live on
    /// [`ProjectPolicyBinding`] records and these lists stay empty.
    pub users: Vec<Subject>,
    pub groups: Vec<Subject>,
}

/// A named collection of policies plus its own subject bindings
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Role {
    pub identity: ObjectIdentity,
    pub display_name: String,
    pub policies: Vec<String>,
    pub users: Vec<Subject>,
    pub groups: Vec<Subject>,
}

/// A membership container; group membership is itself a path in the role
/// graph
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Group {
    pub identity: ObjectIdentity,
    pub display_name: String,
    pub users: Vec<Subject>,
}

/// The project-scoped subject set for a shared policy template
///
/// Keyed deterministically by `(project_id, policy_id)` so that concurrent
/// binds race to create the same record and reconcile via
/// [`Error::ObjectAlreadyExists`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProjectPolicyBinding {
    pub identity: ObjectIdentity,
    pub project_id: String,
    pub policy_id: String,
    pub users: Vec<Subject>,
    pub groups: Vec<Subject>,
}

impl ProjectPolicyBinding {
    /// Deterministic id for the binding of `policy_id` within `project_id`
    pub fn record_id(project_id: &str, policy_id: &str) -> String {
        format!("{}-{}", project_id, policy_id)
    }
}

/// Maximum number of positional value fields in a [`Rule`]
pub const MAX_RULE_FIELDS: usize = 7;

/// The positional on-disk encoding of either a policy statement or a role
/// grouping edge
///
/// This representation is intentionally schema-less: the persistence layer
/// stores `(ptype, v0..v6)` without knowing anything about policy semantics.
/// Policy statements use `ptype == "p"` and grouping edges `ptype == "g"`.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Rule {
    pub ptype: String,
    pub values: Vec<String>,
}

impl Rule {
    pub fn new<S: Into<String>>(ptype: S, values: Vec<String>) -> Rule {
        let rule = Rule { ptype: ptype.into(), values };
        assert!(rule.values.len() <= MAX_RULE_FIELDS);
        rule
    }

    /// The value at positional index `i`, or `""` if the rule is shorter
    pub fn value(&self, i: usize) -> &str {
        self.values.get(i).map(String::as_str).unwrap_or("")
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}, {}", self.ptype, self.values.join(", "))
    }
}

/// A persisted [`Rule`], carrying the record id assigned by the backend
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RuleRecord {
    pub id: Uuid,
    pub rule: Rule,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generation_ordering() {
        let g1 = Generation::new();
        let g2 = g1.next();
        assert!(g1 < g2);
        assert_eq!(g1, Generation::new());
        assert_eq!(g2.to_string(), "2");
    }

    #[test]
    fn test_subject_equality() {
        let resolved = Subject::new("usr-1", "alice");
        let by_id = Subject::by_id("usr-1");
        let by_name = Subject::by_name("alice");
        let other = Subject::new("usr-2", "alice");

        assert!(resolved.same_subject(&by_id));
        assert!(resolved.same_subject(&by_name));
        // id wins over name when both sides carry one
        assert!(!resolved.same_subject(&other));
        assert!(by_name.same_subject(&other));
        assert!(!Subject { id: None, name: None }
            .same_subject(&Subject { id: None, name: None }));
    }

    #[test]
    fn test_subjects_union_dedups() {
        let current = vec![Subject::new("usr-1", "alice")];
        let additions = vec![
            Subject::by_id("usr-1"),
            Subject::new("usr-2", "bob"),
            Subject::by_id("usr-2"),
        ];
        let merged = subjects_union(&current, &additions);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name.as_deref(), Some("alice"));
        assert_eq!(merged[1].id.as_deref(), Some("usr-2"));
    }

    #[test]
    fn test_subjects_difference_ignores_nonmembers() {
        let current = vec![
            Subject::new("usr-1", "alice"),
            Subject::new("usr-2", "bob"),
        ];
        let removals =
            vec![Subject::by_id("usr-2"), Subject::by_id("usr-9")];
        let remaining = subjects_difference(&current, &removals);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_deref(), Some("usr-1"));
    }

    #[test]
    fn test_subjects_intersection_returns_stored_form() {
        let current = vec![
            Subject::new("usr-1", "alice"),
            Subject::new("usr-2", "bob"),
        ];
        let selection =
            vec![Subject::by_name("alice"), Subject::by_id("usr-9")];
        let selected = subjects_intersection(&current, &selection);
        // the match was by name, but the stored subject carries the id
        assert_eq!(selected, vec![Subject::new("usr-1", "alice")]);
    }

    #[test]
    fn test_rule_positional_access() {
        let rule = Rule::new(
            "g",
            vec![String::from("usr-1"), String::from("rol-admin")],
        );
        assert_eq!(rule.value(0), "usr-1");
        assert_eq!(rule.value(1), "rol-admin");
        assert_eq!(rule.value(5), "");
        assert_eq!(rule.to_string(), "g, usr-1, rol-admin");
    }
}
