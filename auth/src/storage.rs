// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes the interfaces through which this subsystem reaches durable
//! state owned by the surrounding platform
//!
//! The platform's generic object store, its identity directory, and the rule
//! persistence backend are all external collaborators.  We consume them
//! through the narrow traits defined here and remain agnostic to their
//! concrete implementations (a database, another service, or the in-memory
//! doubles in `tessera-test-utils`).

use crate::context::OpContext;
use async_trait::async_trait;
use tessera_common::api::external::CreateResult;
use tessera_common::api::external::DeleteResult;
use tessera_common::api::external::Error;
use tessera_common::api::external::Generation;
use tessera_common::api::external::Group;
use tessera_common::api::external::ListResultVec;
use tessera_common::api::external::LookupResult;
use tessera_common::api::external::ObjectIdentity;
use tessera_common::api::external::Phase;
use tessera_common::api::external::Policy;
use tessera_common::api::external::ProjectPolicyBinding;
use tessera_common::api::external::ResourceType;
use tessera_common::api::external::Role;
use tessera_common::api::external::Rule;
use tessera_common::api::external::RuleRecord;
use tessera_common::api::external::Subject;
use tessera_common::api::external::UpdateResult;

/// Kind descriptor implemented by every durable resource the lifecycle
/// controller and binding manager operate on
///
/// Behavior that varies by resource kind (its type name, where its identity
/// metadata lives) is expressed here rather than by inspecting a generic
/// object at runtime.
pub trait StoredObject: Clone + Send + Sync + 'static {
    const RESOURCE_TYPE: ResourceType;

    fn identity(&self) -> &ObjectIdentity;
    fn identity_mut(&mut self) -> &mut ObjectIdentity;

    fn id(&self) -> &str {
        &self.identity().id
    }

    fn tenant_id(&self) -> &str {
        &self.identity().tenant_id
    }

    fn generation(&self) -> Generation {
        self.identity().generation
    }

    fn finalizers(&self) -> &[String] {
        &self.identity().finalizers
    }

    fn phase(&self) -> Phase {
        self.identity().phase
    }
}

impl StoredObject for Policy {
    const RESOURCE_TYPE: ResourceType = ResourceType::Policy;

    fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut ObjectIdentity {
        &mut self.identity
    }
}

impl StoredObject for Role {
    const RESOURCE_TYPE: ResourceType = ResourceType::Role;

    fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut ObjectIdentity {
        &mut self.identity
    }
}

impl StoredObject for Group {
    const RESOURCE_TYPE: ResourceType = ResourceType::Group;

    fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut ObjectIdentity {
        &mut self.identity
    }
}

impl StoredObject for ProjectPolicyBinding {
    const RESOURCE_TYPE: ResourceType = ResourceType::ProjectPolicyBinding;

    fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut ObjectIdentity {
        &mut self.identity
    }
}

/// Selects which objects a list operation returns
#[derive(Clone, Debug, Default)]
pub struct ListSelector {
    /// restrict to one tenant
    pub tenant_id: Option<String>,
    /// restrict to ids with this prefix (used for the deterministic
    /// project-policy-binding keys)
    pub id_prefix: Option<String>,
}

impl ListSelector {
    pub fn all() -> ListSelector {
        ListSelector::default()
    }

    pub fn in_tenant(tenant_id: &str) -> ListSelector {
        ListSelector {
            tenant_id: Some(tenant_id.to_owned()),
            id_prefix: None,
        }
    }

    pub fn matches(&self, identity: &ObjectIdentity) -> bool {
        if let Some(tenant_id) = &self.tenant_id {
            if &identity.tenant_id != tenant_id {
                return false;
            }
        }
        if let Some(prefix) = &self.id_prefix {
            if !identity.id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Generic object store for one resource kind
///
/// `update` and `delete` accept an optional generation precondition.  When
/// present, the store must reject the operation with [`Error::Conflict`]
/// unless the stored generation matches exactly.  Successful updates bump the
/// stored generation.
#[async_trait]
pub trait ObjectStore<T: StoredObject>: Send + Sync {
    async fn get(&self, opctx: &OpContext, id: &str) -> LookupResult<T>;

    async fn list(
        &self,
        opctx: &OpContext,
        selector: &ListSelector,
    ) -> ListResultVec<T>;

    async fn create(&self, opctx: &OpContext, object: T) -> CreateResult<T>;

    async fn update(
        &self,
        opctx: &OpContext,
        object: T,
        precondition: Option<Generation>,
    ) -> UpdateResult<T>;

    async fn delete(
        &self,
        opctx: &OpContext,
        id: &str,
        precondition: Option<Generation>,
    ) -> DeleteResult;
}

/// A partial positional pattern over rule tuples
///
/// `values[i]` applies to tuple field `field_index + i`; an empty string
/// matches anything.  This is how we delete every edge touching a deleted
/// subject or role without enumerating full tuples.
#[derive(Clone, Debug)]
pub struct RuleFilter {
    pub ptype: String,
    pub field_index: usize,
    pub values: Vec<String>,
}

impl RuleFilter {
    pub fn new(
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> RuleFilter {
        RuleFilter {
            ptype: ptype.to_owned(),
            field_index,
            values: values.iter().map(|v| (*v).to_owned()).collect(),
        }
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        rule.ptype == self.ptype
            && self.values.iter().enumerate().all(|(i, pattern)| {
                pattern.is_empty()
                    || rule.value(self.field_index + i) == pattern
            })
    }
}

/// Persistence backend for rule tuples
///
/// The backend stores `(ptype, v0..v6)` records without interpreting them.
/// `rule_create` must fail with [`Error::ObjectAlreadyExists`] when an
/// identical tuple is already present, which the adapter relies on for
/// idempotent binds.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn rule_create(
        &self,
        opctx: &OpContext,
        rule: Rule,
    ) -> CreateResult<RuleRecord>;

    async fn rule_list(&self, opctx: &OpContext) -> ListResultVec<RuleRecord>;

    /// Deletes the record whose tuple equals `rule` exactly
    ///
    /// Unlike [`RuleStore::rules_delete_matching`], empty fields here are
    /// not wildcards: a grouping edge in the global domain (`""`) only
    /// matches itself.  Fails with [`Error::ObjectNotFound`] if no such
    /// record exists.
    async fn rule_delete(
        &self,
        opctx: &OpContext,
        rule: &Rule,
    ) -> DeleteResult;

    /// Deletes every record matching `filter`, returning how many were
    /// removed
    async fn rules_delete_matching(
        &self,
        opctx: &OpContext,
        filter: &RuleFilter,
    ) -> Result<usize, Error>;

    async fn rules_delete_all(&self, opctx: &OpContext) -> DeleteResult;
}

/// Identity/group directory used only for subject resolution
///
/// All lookups are tolerated to return [`Error::ObjectNotFound`]: the
/// directory and this subsystem converge eventually, so a stale reference is
/// a warning, not a failure.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_by_name(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        name: &str,
    ) -> LookupResult<Subject>;

    async fn user_by_id(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        id: &str,
    ) -> LookupResult<Subject>;

    async fn group_by_name(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        name: &str,
    ) -> LookupResult<Subject>;

    async fn group_by_id(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        id: &str,
    ) -> LookupResult<Subject>;
}

#[cfg(test)]
mod test {
    use super::RuleFilter;
    use tessera_common::api::external::Rule;

    fn edge(member: &str, role: &str, domain: &str) -> Rule {
        Rule::new(
            "g",
            vec![member.to_owned(), role.to_owned(), domain.to_owned()],
        )
    }

    #[test]
    fn test_filter_empty_fields_are_wildcards() {
        let filter = RuleFilter::new("g", 0, &["usr-1"]);
        assert!(filter.matches(&edge("usr-1", "rol-admin", "t1")));
        assert!(filter.matches(&edge("usr-1", "rol-base", "")));
        assert!(!filter.matches(&edge("usr-2", "rol-admin", "t1")));

        // offset into the tuple
        let filter = RuleFilter::new("g", 1, &["rol-admin", "t1"]);
        assert!(filter.matches(&edge("usr-1", "rol-admin", "t1")));
        assert!(!filter.matches(&edge("usr-1", "rol-admin", "t2")));

        let filter = RuleFilter::new("g", 1, &["", "t1"]);
        assert!(filter.matches(&edge("usr-1", "rol-base", "t1")));
    }

    #[test]
    fn test_filter_ptype_must_match() {
        let filter = RuleFilter::new("p", 0, &["usr-1"]);
        assert!(!filter.matches(&edge("usr-1", "rol-admin", "t1")));
    }
}
