// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subject bindings for policies, roles, and groups
//!
//! A binding attaches a set of subjects (users and groups) to a target:
//! a platform-scoped policy, a role, a group, or the per-project record of
//! a project-scoped policy template.  Every bind and unbind is idempotent
//! set arithmetic on the target's subject lists, written through to durable
//! storage first and then mirrored as grouping edges in the role graph via
//! the enforcer, so authorization decisions track the stored bindings.
//!
//! Subjects arriving in a bind request may carry only an id or only a name.
//! Validation resolves them against the identity directory and attaches the
//! missing half.  A subject the directory does not know is logged and
//! dropped rather than failing the request: the directory and this
//! subsystem converge eventually, and a stale reference in a bind request
//! must not wedge the whole binding.  Unbind never consults the directory:
//! removal filters the stored set by subject identity, so revoking a
//! subject the directory has since deleted still takes effect.  Tenant
//! isolation, by contrast, is a hard failure: a request scoped to one
//! tenant cannot touch a target owned by another.
//!
//! There is no transactionality across multiple policies in one request.
//! Each policy is processed independently, failures are accumulated into
//! one aggregate error, and policies that already succeeded stay bound.

use slog::warn;
use std::sync::Arc;
use tessera_auth::authz::Enforcer;
use tessera_auth::context::OpContext;
use tessera_auth::storage::Directory;
use tessera_auth::storage::ObjectStore;
use tessera_auth::storage::StoredObject;
use tessera_common::api::external::subjects_difference;
use tessera_common::api::external::subjects_intersection;
use tessera_common::api::external::subjects_union;
use tessera_common::api::external::Error;
use tessera_common::api::external::Group;
use tessera_common::api::external::ListResultVec;
use tessera_common::api::external::ObjectIdentity;
use tessera_common::api::external::Policy;
use tessera_common::api::external::PolicyScope;
use tessera_common::api::external::ProjectPolicyBinding;
use tessera_common::api::external::Role;
use tessera_common::api::external::Subject;
use tessera_common::api::external::UpdateResult;
use tessera_common::api::external::ValidationErrors;

/// Which directory namespace a subject resolves in
#[derive(Clone, Copy, Debug)]
enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    fn label(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Group => "group",
        }
    }
}

/// The outcome of resolving a request's subject lists against the directory
#[derive(Clone, Debug, Default)]
pub struct ResolvedSubjects {
    pub users: Vec<Subject>,
    pub groups: Vec<Subject>,
}

impl ResolvedSubjects {
    fn iter(&self) -> impl Iterator<Item = &Subject> {
        self.users.iter().chain(self.groups.iter())
    }
}

pub struct BindingManager {
    policies: Arc<dyn ObjectStore<Policy>>,
    roles: Arc<dyn ObjectStore<Role>>,
    groups: Arc<dyn ObjectStore<Group>>,
    project_bindings: Arc<dyn ObjectStore<ProjectPolicyBinding>>,
    directory: Arc<dyn Directory>,
    enforcer: Arc<Enforcer>,
}

impl BindingManager {
    pub fn new(
        policies: Arc<dyn ObjectStore<Policy>>,
        roles: Arc<dyn ObjectStore<Role>>,
        groups: Arc<dyn ObjectStore<Group>>,
        project_bindings: Arc<dyn ObjectStore<ProjectPolicyBinding>>,
        directory: Arc<dyn Directory>,
        enforcer: Arc<Enforcer>,
    ) -> BindingManager {
        BindingManager {
            policies,
            roles,
            groups,
            project_bindings,
            directory,
            enforcer,
        }
    }

    /// Resolves the request's subject lists within `tenant_id`
    ///
    /// Every resolved subject comes back with both id and name attached.
    /// Unresolvable subjects are logged and dropped.  Subjects carrying
    /// neither id nor name accumulate into a single aggregate error.
    pub async fn validate(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        users: &[Subject],
        groups: &[Subject],
    ) -> Result<ResolvedSubjects, Error> {
        let mut errors = ValidationErrors::new();
        let users = self
            .resolve_all(opctx, tenant_id, users, SubjectKind::User, &mut errors)
            .await?;
        let groups = self
            .resolve_all(
                opctx,
                tenant_id,
                groups,
                SubjectKind::Group,
                &mut errors,
            )
            .await?;
        errors.into_result()?;
        Ok(ResolvedSubjects { users, groups })
    }

    /// Adds subjects to a platform-scoped policy
    pub async fn policy_bind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        policy_id: &str,
        users: &[Subject],
        groups: &[Subject],
    ) -> UpdateResult<Policy> {
        let policy = self.policies.get(opctx, policy_id).await?;
        require_scope(&policy, PolicyScope::Platform)?;
        require_same_tenant(&policy, tenant_id)?;
        let resolved = self.validate(opctx, tenant_id, users, groups).await?;

        let generation = policy.generation();
        let mut updated = policy;
        updated.users = subjects_union(&updated.users, &resolved.users);
        updated.groups = subjects_union(&updated.groups, &resolved.groups);
        let updated =
            self.policies.update(opctx, updated, Some(generation)).await?;
        self.edges_add(opctx, &resolved, policy_id, tenant_id).await?;
        Ok(updated)
    }

    /// Removes subjects from a platform-scoped policy; removing subjects
    /// that are not bound is a no-op
    ///
    /// Removal never consults the directory: a revocation must succeed even
    /// after the subject has been deleted from the directory.
    pub async fn policy_unbind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        policy_id: &str,
        users: &[Subject],
        groups: &[Subject],
    ) -> UpdateResult<Policy> {
        let policy = self.policies.get(opctx, policy_id).await?;
        require_scope(&policy, PolicyScope::Platform)?;
        require_same_tenant(&policy, tenant_id)?;
        check_removal_subjects(users, groups)?;

        // edges were written under the stored subjects' graph keys, so the
        // removal set is taken from the stored lists, not the request
        let removed = ResolvedSubjects {
            users: subjects_intersection(&policy.users, users),
            groups: subjects_intersection(&policy.groups, groups),
        };
        let generation = policy.generation();
        let mut updated = policy;
        updated.users = subjects_difference(&updated.users, users);
        updated.groups = subjects_difference(&updated.groups, groups);
        let updated =
            self.policies.update(opctx, updated, Some(generation)).await?;
        self.edges_remove(opctx, &removed, policy_id, tenant_id).await?;
        Ok(updated)
    }

    /// Binds the same subjects to several policies at once
    ///
    /// Policies are processed independently: failures accumulate into one
    /// aggregate error and policies that already succeeded are not rolled
    /// back.
    pub async fn policies_bind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        policy_ids: &[&str],
        users: &[Subject],
        groups: &[Subject],
    ) -> ListResultVec<Policy> {
        let mut errors = ValidationErrors::new();
        let mut updated = Vec::new();
        for policy_id in policy_ids {
            match self
                .policy_bind(opctx, tenant_id, policy_id, users, groups)
                .await
            {
                Ok(policy) => updated.push(policy),
                Err(error) => {
                    warn!(opctx.log, "bind failed for one policy";
                        "policy_id" => *policy_id,
                        "error" => %error,
                    );
                    errors.push(error);
                }
            }
        }
        errors.into_result()?;
        Ok(updated)
    }

    /// Multi-policy variant of [`BindingManager::policy_unbind`], with the
    /// same independent-failure semantics as [`BindingManager::policies_bind`]
    pub async fn policies_unbind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        policy_ids: &[&str],
        users: &[Subject],
        groups: &[Subject],
    ) -> ListResultVec<Policy> {
        let mut errors = ValidationErrors::new();
        let mut updated = Vec::new();
        for policy_id in policy_ids {
            match self
                .policy_unbind(opctx, tenant_id, policy_id, users, groups)
                .await
            {
                Ok(policy) => updated.push(policy),
                Err(error) => {
                    warn!(opctx.log, "unbind failed for one policy";
                        "policy_id" => *policy_id,
                        "error" => %error,
                    );
                    errors.push(error);
                }
            }
        }
        errors.into_result()?;
        Ok(updated)
    }

    /// Adds subjects to a role
    pub async fn role_bind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        role_id: &str,
        users: &[Subject],
        groups: &[Subject],
    ) -> UpdateResult<Role> {
        let role = self.roles.get(opctx, role_id).await?;
        require_same_tenant(&role, tenant_id)?;
        let resolved = self.validate(opctx, tenant_id, users, groups).await?;

        let generation = role.generation();
        let mut updated = role;
        updated.users = subjects_union(&updated.users, &resolved.users);
        updated.groups = subjects_union(&updated.groups, &resolved.groups);
        let updated =
            self.roles.update(opctx, updated, Some(generation)).await?;
        self.edges_add(opctx, &resolved, role_id, tenant_id).await?;
        Ok(updated)
    }

    /// Removes subjects from a role, without consulting the directory
    pub async fn role_unbind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        role_id: &str,
        users: &[Subject],
        groups: &[Subject],
    ) -> UpdateResult<Role> {
        let role = self.roles.get(opctx, role_id).await?;
        require_same_tenant(&role, tenant_id)?;
        check_removal_subjects(users, groups)?;

        let removed = ResolvedSubjects {
            users: subjects_intersection(&role.users, users),
            groups: subjects_intersection(&role.groups, groups),
        };
        let generation = role.generation();
        let mut updated = role;
        updated.users = subjects_difference(&updated.users, users);
        updated.groups = subjects_difference(&updated.groups, groups);
        let updated =
            self.roles.update(opctx, updated, Some(generation)).await?;
        self.edges_remove(opctx, &removed, role_id, tenant_id).await?;
        Ok(updated)
    }

    /// Adds users to a group; group membership is itself an edge in the
    /// role graph, so members inherit whatever the group is bound to
    pub async fn group_bind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        group_id: &str,
        users: &[Subject],
    ) -> UpdateResult<Group> {
        let group = self.groups.get(opctx, group_id).await?;
        require_same_tenant(&group, tenant_id)?;
        let resolved = self.validate(opctx, tenant_id, users, &[]).await?;

        let generation = group.generation();
        let mut updated = group;
        updated.users = subjects_union(&updated.users, &resolved.users);
        let updated =
            self.groups.update(opctx, updated, Some(generation)).await?;
        self.edges_add(opctx, &resolved, group_id, tenant_id).await?;
        Ok(updated)
    }

    /// Removes users from a group, without consulting the directory
    pub async fn group_unbind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        group_id: &str,
        users: &[Subject],
    ) -> UpdateResult<Group> {
        let group = self.groups.get(opctx, group_id).await?;
        require_same_tenant(&group, tenant_id)?;
        check_removal_subjects(users, &[])?;

        let removed = ResolvedSubjects {
            users: subjects_intersection(&group.users, users),
            groups: Vec::new(),
        };
        let generation = group.generation();
        let mut updated = group;
        updated.users = subjects_difference(&updated.users, users);
        let updated =
            self.groups.update(opctx, updated, Some(generation)).await?;
        self.edges_remove(opctx, &removed, group_id, tenant_id).await?;
        Ok(updated)
    }

    /// Adds subjects to the per-project binding of a project-scoped policy
    ///
    /// The binding record is created on first use.  Its id is deterministic
    /// in `(project_id, policy_id)`, so two concurrent binds race to create
    /// the same record; the loser sees `ObjectAlreadyExists` and re-fetches.
    pub async fn project_policy_bind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        project_id: &str,
        policy_id: &str,
        users: &[Subject],
        groups: &[Subject],
    ) -> UpdateResult<ProjectPolicyBinding> {
        let policy = self.policies.get(opctx, policy_id).await?;
        require_scope(&policy, PolicyScope::Project)?;
        require_same_tenant(&policy, tenant_id)?;
        let resolved = self.validate(opctx, tenant_id, users, groups).await?;

        let record = self
            .ensure_project_binding(opctx, tenant_id, project_id, policy_id)
            .await?;
        let generation = record.generation();
        let mut updated = record;
        updated.users = subjects_union(&updated.users, &resolved.users);
        updated.groups = subjects_union(&updated.groups, &resolved.groups);
        let updated = self
            .project_bindings
            .update(opctx, updated, Some(generation))
            .await?;
        let domain = project_domain(tenant_id, project_id);
        self.edges_add(opctx, &resolved, policy_id, &domain).await?;
        Ok(updated)
    }

    /// Removes subjects from the per-project binding of a project-scoped
    /// policy, without consulting the directory
    pub async fn project_policy_unbind(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        project_id: &str,
        policy_id: &str,
        users: &[Subject],
        groups: &[Subject],
    ) -> UpdateResult<ProjectPolicyBinding> {
        let policy = self.policies.get(opctx, policy_id).await?;
        require_scope(&policy, PolicyScope::Project)?;
        require_same_tenant(&policy, tenant_id)?;
        check_removal_subjects(users, groups)?;

        let record_id = ProjectPolicyBinding::record_id(project_id, policy_id);
        let record = self.project_bindings.get(opctx, &record_id).await?;
        let removed = ResolvedSubjects {
            users: subjects_intersection(&record.users, users),
            groups: subjects_intersection(&record.groups, groups),
        };
        let generation = record.generation();
        let mut updated = record;
        updated.users = subjects_difference(&updated.users, users);
        updated.groups = subjects_difference(&updated.groups, groups);
        let updated = self
            .project_bindings
            .update(opctx, updated, Some(generation))
            .await?;
        let domain = project_domain(tenant_id, project_id);
        self.edges_remove(opctx, &removed, policy_id, &domain).await?;
        Ok(updated)
    }

    /// Drops every role-graph edge touching `key`, in any domain
    ///
    /// Called when the underlying subject, role, or group is deleted: the
    /// node may appear on the member side of its own bindings and on the
    /// role side of edges pointing at it (group memberships, role grants).
    /// Returns how many durable records were removed.
    pub async fn purge_graph_node(
        &self,
        opctx: &OpContext,
        key: &str,
    ) -> Result<usize, Error> {
        let as_member =
            self.enforcer.remove_filtered_groupings(opctx, 0, &[key]).await?;
        let as_role =
            self.enforcer.remove_filtered_groupings(opctx, 1, &[key]).await?;
        Ok(as_member + as_role)
    }

    async fn resolve_all(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        subjects: &[Subject],
        kind: SubjectKind,
        errors: &mut ValidationErrors,
    ) -> Result<Vec<Subject>, Error> {
        let mut resolved = Vec::new();
        for subject in subjects {
            if subject.is_empty() {
                errors.invalid_value(
                    kind.label(),
                    String::from("subject has neither id nor name"),
                );
                continue;
            }
            match self.resolve_one(opctx, tenant_id, subject, kind).await {
                Ok(subject) => resolved.push(subject),
                Err(Error::ObjectNotFound { .. }) => {
                    warn!(opctx.log, "dropping unresolvable subject";
                        "kind" => kind.label(),
                        "subject" => %subject,
                        "tenant_id" => tenant_id,
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(resolved)
    }

    async fn resolve_one(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        subject: &Subject,
        kind: SubjectKind,
    ) -> Result<Subject, Error> {
        match (kind, &subject.id, &subject.name) {
            (SubjectKind::User, Some(id), _) => {
                self.directory.user_by_id(opctx, tenant_id, id).await
            }
            (SubjectKind::User, None, Some(name)) => {
                self.directory.user_by_name(opctx, tenant_id, name).await
            }
            (SubjectKind::Group, Some(id), _) => {
                self.directory.group_by_id(opctx, tenant_id, id).await
            }
            (SubjectKind::Group, None, Some(name)) => {
                self.directory.group_by_name(opctx, tenant_id, name).await
            }
            // callers filter empty subjects out before resolution
            (_, None, None) => Err(Error::internal_error(
                "attempted to resolve an empty subject",
            )),
        }
    }

    async fn edges_add(
        &self,
        opctx: &OpContext,
        resolved: &ResolvedSubjects,
        target: &str,
        domain: &str,
    ) -> Result<(), Error> {
        for subject in resolved.iter() {
            if let Some(key) = subject.graph_key() {
                self.enforcer
                    .add_grouping(opctx, key, target, domain)
                    .await?;
            }
        }
        Ok(())
    }

    async fn edges_remove(
        &self,
        opctx: &OpContext,
        resolved: &ResolvedSubjects,
        target: &str,
        domain: &str,
    ) -> Result<(), Error> {
        for subject in resolved.iter() {
            if let Some(key) = subject.graph_key() {
                self.enforcer
                    .remove_grouping(opctx, key, target, domain)
                    .await?;
            }
        }
        Ok(())
    }

    async fn ensure_project_binding(
        &self,
        opctx: &OpContext,
        tenant_id: &str,
        project_id: &str,
        policy_id: &str,
    ) -> UpdateResult<ProjectPolicyBinding> {
        let record_id = ProjectPolicyBinding::record_id(project_id, policy_id);
        match self.project_bindings.get(opctx, &record_id).await {
            Ok(record) => return Ok(record),
            Err(Error::ObjectNotFound { .. }) => (),
            Err(error) => return Err(error),
        }
        let record = ProjectPolicyBinding {
            identity: ObjectIdentity::new(record_id.as_str(), tenant_id),
            project_id: project_id.to_owned(),
            policy_id: policy_id.to_owned(),
            users: Vec::new(),
            groups: Vec::new(),
        };
        match self.project_bindings.create(opctx, record).await {
            Ok(record) => Ok(record),
            // lost the creation race; the record now exists
            Err(Error::ObjectAlreadyExists { .. }) => {
                self.project_bindings.get(opctx, &record_id).await
            }
            Err(error) => Err(error),
        }
    }
}

/// The role-graph domain for project-scoped bindings
fn project_domain(tenant_id: &str, project_id: &str) -> String {
    format!("{}/{}", tenant_id, project_id)
}

fn require_scope(policy: &Policy, scope: PolicyScope) -> Result<(), Error> {
    if policy.scope != scope {
        return Err(Error::invalid_request(&format!(
            "policy {:?} has scope {:?}; this operation requires {:?}",
            policy.id(),
            policy.scope,
            scope,
        )));
    }
    Ok(())
}

/// Rejects removal requests naming subjects with neither id nor name
///
/// This is the only validation an unbind performs on its subjects; see the
/// module docs for why removal skips directory resolution.
fn check_removal_subjects(
    users: &[Subject],
    groups: &[Subject],
) -> Result<(), Error> {
    let mut errors = ValidationErrors::new();
    for (label, subjects) in [("user", users), ("group", groups)] {
        for subject in subjects {
            if subject.is_empty() {
                errors.invalid_value(
                    label,
                    String::from("subject has neither id nor name"),
                );
            }
        }
    }
    errors.into_result()
}

fn require_same_tenant<T: StoredObject>(
    target: &T,
    tenant_id: &str,
) -> Result<(), Error> {
    if target.tenant_id() != tenant_id {
        let mut errors = ValidationErrors::new();
        errors.invalid_value(
            "tenant_id",
            format!(
                "{} {:?} does not belong to tenant {:?}",
                T::RESOURCE_TYPE,
                target.id(),
                tenant_id,
            ),
        );
        errors.into_result()?;
    }
    Ok(())
}
