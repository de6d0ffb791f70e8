// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Policy statement evaluation
//!
//! The [`Engine`] combines role-graph reachability with the loaded statement
//! set to produce allow/deny decisions.  It has no side effects and no
//! knowledge of persistence; see [`crate::authz::enforcer`] for the
//! synchronized facade that owns one of these.

use crate::authz::matcher::key_match;
use crate::authz::role_manager::RoleManager;
use tessera_common::api::external::Effect;
use tessera_common::api::external::Statement;

/// One evaluated policy line: `(subject, object, action, effect)`
///
/// The subject slot usually names a role; the object and action slots may
/// carry wildcard patterns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyStatement {
    pub subject: String,
    pub object: String,
    pub action: String,
    pub effect: Effect,
}

impl PolicyStatement {
    pub fn new(
        subject: &str,
        object: &str,
        action: &str,
        effect: Effect,
    ) -> PolicyStatement {
        PolicyStatement {
            subject: subject.to_owned(),
            object: object.to_owned(),
            action: action.to_owned(),
            effect,
        }
    }

    /// Expands a policy's statement into one line per `(resource, action)`
    /// combination, all granted to `subject`
    pub fn expand(subject: &str, statement: &Statement) -> Vec<PolicyStatement> {
        let mut lines = Vec::with_capacity(
            statement.resources.len() * statement.actions.len(),
        );
        for resource in &statement.resources {
            for action in &statement.actions {
                lines.push(PolicyStatement::new(
                    subject,
                    resource,
                    action,
                    statement.effect,
                ));
            }
        }
        lines
    }

    /// The positional field at index `i`, mirroring the rule tuple layout
    /// `(v0=subject, v1=object, v2=action, v3=effect)`
    pub fn field(&self, i: usize) -> &str {
        match i {
            0 => &self.subject,
            1 => &self.object,
            2 => &self.action,
            3 => match self.effect {
                Effect::Allow => "allow",
                Effect::Deny => "deny",
            },
            _ => "",
        }
    }
}

/// An authorization question: may `subject` perform `action` on `object`
/// within `domain`?
#[derive(Clone, Copy, Debug)]
pub struct AccessRequest<'a> {
    pub subject: &'a str,
    pub domain: &'a str,
    pub object: &'a str,
    pub action: &'a str,
}

/// Outcome of evaluating an [`AccessRequest`]
///
/// `NoOpinion` means no statement matched at all.  Callers must treat it as
/// deny-by-default, but it is kept distinct from `Deny` so that a caller can
/// fall through to another authority if it has one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Allow,
    Deny,
    NoOpinion,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Evaluates access requests against the loaded statement set and the role
/// graph
pub struct Engine {
    statements: Vec<PolicyStatement>,
    roles: RoleManager,
}

impl Engine {
    pub fn new(roles: RoleManager) -> Engine {
        Engine { statements: Vec::new(), roles }
    }

    pub fn roles(&self) -> &RoleManager {
        &self.roles
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    /// Adds a statement; re-adding an identical line is a no-op
    pub fn add_statement(&mut self, statement: PolicyStatement) -> bool {
        if self.statements.contains(&statement) {
            return false;
        }
        self.statements.push(statement);
        true
    }

    /// Removes an exact statement; removing an absent line is a no-op
    pub fn remove_statement(&mut self, statement: &PolicyStatement) -> bool {
        let before = self.statements.len();
        self.statements.retain(|s| s != statement);
        before != self.statements.len()
    }

    /// Removes every statement matching the partial positional pattern
    /// starting at `field_index` (empty strings match anything), returning
    /// how many were removed
    pub fn remove_filtered_statements(
        &mut self,
        field_index: usize,
        values: &[&str],
    ) -> usize {
        let before = self.statements.len();
        self.statements.retain(|s| {
            !values.iter().enumerate().all(|(i, pattern)| {
                pattern.is_empty() || s.field(field_index + i) == *pattern
            })
        });
        before - self.statements.len()
    }

    /// Resets both the statement set and the role graph
    pub fn clear(&mut self) {
        self.statements.clear();
        self.roles.clear();
    }

    /// Evaluates `request` against every statement
    ///
    /// Allow iff at least one matching statement allows and none denies; a
    /// single matching deny is absolute.  Never fails: an unknown subject
    /// simply matches nothing.
    pub fn enforce(&self, request: &AccessRequest<'_>) -> Decision {
        let mut any_allow = false;
        for statement in &self.statements {
            if !self.subject_matches(request, statement) {
                continue;
            }
            if !key_match(request.object, &statement.object)
                || !key_match(request.action, &statement.action)
            {
                continue;
            }
            match statement.effect {
                // deny overrides everything else; no need to keep looking
                Effect::Deny => return Decision::Deny,
                Effect::Allow => any_allow = true,
            }
        }
        if any_allow { Decision::Allow } else { Decision::NoOpinion }
    }

    fn subject_matches(
        &self,
        request: &AccessRequest<'_>,
        statement: &PolicyStatement,
    ) -> bool {
        statement.subject == request.subject
            || self.roles.has_link(
                request.subject,
                &statement.subject,
                request.domain,
            )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authz::role_manager::RoleManager;
    use tessera_common::api::external::Statement;

    fn engine_with_roles(
        links: &[(&str, &str, &str)],
        statements: &[PolicyStatement],
    ) -> Engine {
        let roles = RoleManager::default();
        for (member, role, domain) in links {
            roles.add_link(member, role, domain);
        }
        let mut engine = Engine::new(roles);
        for statement in statements {
            engine.add_statement(statement.clone());
        }
        engine
    }

    #[test]
    fn test_transitive_role_grants_access() {
        // tenant t1: u1 -> rol-admin -> rol-base; pol-1 grants rol-base
        // "get" on "ns/*"
        let engine = engine_with_roles(
            &[("u1", "rol-admin", ""), ("rol-admin", "rol-base", "")],
            &[PolicyStatement::new(
                "rol-base",
                "ns/*",
                "get",
                Effect::Allow,
            )],
        );
        assert!(engine.roles().has_link("u1", "rol-base", ""));
        let decision = engine.enforce(&AccessRequest {
            subject: "u1",
            domain: "",
            object: "ns/x",
            action: "get",
        });
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_deny_overrides_allow() {
        let engine = engine_with_roles(
            &[("u1", "rol-admin", ""), ("rol-admin", "rol-base", "")],
            &[
                PolicyStatement::new("rol-base", "ns/*", "get", Effect::Allow),
                PolicyStatement::new("u1", "ns/*", "get", Effect::Deny),
            ],
        );
        let decision = engine.enforce(&AccessRequest {
            subject: "u1",
            domain: "",
            object: "ns/x",
            action: "get",
        });
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn test_no_match_is_neutral() {
        let engine = engine_with_roles(
            &[],
            &[PolicyStatement::new("u1", "ns/*", "get", Effect::Allow)],
        );
        let decision = engine.enforce(&AccessRequest {
            subject: "u2",
            domain: "",
            object: "ns/x",
            action: "get",
        });
        assert_eq!(decision, Decision::NoOpinion);
        assert!(!decision.is_allowed());

        // same subject, action not covered: also neutral, not deny
        let decision = engine.enforce(&AccessRequest {
            subject: "u1",
            domain: "",
            object: "ns/x",
            action: "delete",
        });
        assert_eq!(decision, Decision::NoOpinion);
    }

    #[test]
    fn test_domain_scopes_role_matching() {
        let engine = engine_with_roles(
            &[("u1", "rol-admin", "t1")],
            &[PolicyStatement::new("rol-admin", "*", "*", Effect::Allow)],
        );
        let request = |domain| AccessRequest {
            subject: "u1",
            domain,
            object: "ns/x",
            action: "get",
        };
        assert_eq!(engine.enforce(&request("t1")), Decision::Allow);
        assert_eq!(engine.enforce(&request("t2")), Decision::NoOpinion);
    }

    #[test]
    fn test_statement_set_is_deduplicated() {
        let mut engine = Engine::new(RoleManager::default());
        let line = PolicyStatement::new("u1", "ns/*", "get", Effect::Allow);
        assert!(engine.add_statement(line.clone()));
        assert!(!engine.add_statement(line.clone()));
        assert_eq!(engine.statements().len(), 1);
        assert!(engine.remove_statement(&line));
        assert!(!engine.remove_statement(&line));
    }

    #[test]
    fn test_remove_filtered_statements() {
        let mut engine = Engine::new(RoleManager::default());
        engine.add_statement(PolicyStatement::new(
            "u1", "ns/*", "get", Effect::Allow,
        ));
        engine.add_statement(PolicyStatement::new(
            "u1", "ns/*", "delete", Effect::Allow,
        ));
        engine.add_statement(PolicyStatement::new(
            "u2", "ns/*", "get", Effect::Allow,
        ));
        assert_eq!(engine.remove_filtered_statements(0, &["u1"]), 2);
        assert_eq!(engine.statements().len(), 1);
        assert_eq!(engine.remove_filtered_statements(2, &["get"]), 1);
    }

    #[test]
    fn test_expand_cross_product() {
        let statement = Statement {
            actions: vec![String::from("get"), String::from("list")],
            resources: vec![String::from("ns/*"), String::from("cfg/*")],
            effect: Effect::Deny,
        };
        let lines = PolicyStatement::expand("rol-audit", &statement);
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.subject == "rol-audit"));
        assert!(lines.iter().all(|l| l.effect == Effect::Deny));
        assert!(lines
            .iter()
            .any(|l| l.object == "cfg/*" && l.action == "list"));
    }
}
