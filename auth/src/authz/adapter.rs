// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridges the in-memory policy engine and the durable rule store
//!
//! The adapter translates between [`PolicyStatement`]s / grouping edges and
//! the positional rule tuples the persistence backend stores.  It supports a
//! full replay (`load_policy`), a destructive full rewrite (`save_policy`),
//! and the incremental single-tuple paths used for auto-save on bind and
//! unbind.

use crate::authz::engine::Engine;
use crate::authz::engine::PolicyStatement;
use crate::context::OpContext;
use crate::storage::RuleFilter;
use crate::storage::RuleStore;
use slog::warn;
use std::sync::Arc;
use tessera_common::api::external::Effect;
use tessera_common::api::external::Error;
use tessera_common::api::external::Rule;

/// ptype of a policy statement tuple
pub const PTYPE_POLICY: &str = "p";
/// ptype of a role grouping edge tuple
pub const PTYPE_GROUPING: &str = "g";

/// Encodes a policy statement as a `("p", sub, obj, act, eff)` tuple
pub fn statement_to_rule(statement: &PolicyStatement) -> Rule {
    Rule::new(
        PTYPE_POLICY,
        vec![
            statement.subject.clone(),
            statement.object.clone(),
            statement.action.clone(),
            statement.effect.to_string(),
        ],
    )
}

/// Decodes a `("p", …)` tuple back into a policy statement
pub fn rule_to_statement(rule: &Rule) -> Result<PolicyStatement, Error> {
    if rule.values.len() < 4 {
        return Err(Error::internal_error(&format!(
            "malformed policy statement tuple: {}",
            rule
        )));
    }
    Ok(PolicyStatement {
        subject: rule.value(0).to_owned(),
        object: rule.value(1).to_owned(),
        action: rule.value(2).to_owned(),
        effect: Effect::parse(rule.value(3))?,
    })
}

/// Encodes a grouping edge as a `("g", member, role, domain)` tuple
///
/// The domain field is always written, even when it is the empty global
/// domain, so that exact-tuple deletion stays unambiguous.
pub fn edge_to_rule(member: &str, role: &str, domain: &str) -> Rule {
    Rule::new(
        PTYPE_GROUPING,
        vec![member.to_owned(), role.to_owned(), domain.to_owned()],
    )
}

/// Decodes a `("g", …)` tuple into `(member, role, domain)`
pub fn rule_to_edge(rule: &Rule) -> Result<(String, String, String), Error> {
    if rule.values.len() < 2 {
        return Err(Error::internal_error(&format!(
            "malformed grouping edge tuple: {}",
            rule
        )));
    }
    Ok((
        rule.value(0).to_owned(),
        rule.value(1).to_owned(),
        rule.value(2).to_owned(),
    ))
}

/// Keeps an [`Engine`] synchronized with a durable [`RuleStore`]
///
/// The adapter itself does no locking; the enforcer serializes `save_policy`
/// and the incremental paths behind its write lock.
pub struct RuleAdapter {
    store: Arc<dyn RuleStore>,
}

impl RuleAdapter {
    pub fn new(store: Arc<dyn RuleStore>) -> RuleAdapter {
        RuleAdapter { store }
    }

    /// Lists all persisted tuples and replays each into `engine`
    ///
    /// Intended for process start-up and full resyncs; callers clear the
    /// engine first.  Malformed or unrecognized tuples are logged and
    /// skipped rather than failing the whole load, since one bad record must
    /// not take authorization offline.
    pub async fn load_policy(
        &self,
        opctx: &OpContext,
        engine: &mut Engine,
    ) -> Result<(), Error> {
        let records = self.store.rule_list(opctx).await?;
        for record in records {
            match record.rule.ptype.as_str() {
                PTYPE_POLICY => match rule_to_statement(&record.rule) {
                    Ok(statement) => {
                        engine.add_statement(statement);
                    }
                    Err(error) => {
                        warn!(opctx.log, "skipping malformed policy tuple";
                            "record_id" => record.id.to_string(),
                            "error" => %error,
                        );
                    }
                },
                PTYPE_GROUPING => match rule_to_edge(&record.rule) {
                    Ok((member, role, domain)) => {
                        engine.roles().add_link(&member, &role, &domain);
                    }
                    Err(error) => {
                        warn!(opctx.log, "skipping malformed grouping tuple";
                            "record_id" => record.id.to_string(),
                            "error" => %error,
                        );
                    }
                },
                other => {
                    warn!(opctx.log, "skipping tuple with unknown ptype";
                        "record_id" => record.id.to_string(),
                        "ptype" => other,
                    );
                }
            }
        }
        Ok(())
    }

    /// Destructive full rewrite: deletes every persisted tuple, then
    /// re-creates one record per in-memory statement and grouping edge
    ///
    /// Not safe against concurrent writers; the enforcer holds its write
    /// lock across the whole rewrite.
    pub async fn save_policy(
        &self,
        opctx: &OpContext,
        engine: &Engine,
    ) -> Result<(), Error> {
        self.store.rules_delete_all(opctx).await?;
        for statement in engine.statements() {
            self.store
                .rule_create(opctx, statement_to_rule(statement))
                .await?;
        }
        for (member, role, domain) in engine.roles().all_links() {
            self.store
                .rule_create(opctx, edge_to_rule(&member, &role, &domain))
                .await?;
        }
        Ok(())
    }

    /// Creates one tuple; an identical existing tuple counts as success
    ///
    /// Returns whether a record was actually created.
    pub async fn add_rule(
        &self,
        opctx: &OpContext,
        rule: Rule,
    ) -> Result<bool, Error> {
        match self.store.rule_create(opctx, rule).await {
            Ok(_) => Ok(true),
            Err(Error::ObjectAlreadyExists { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Deletes one exact tuple; a missing tuple counts as success
    ///
    /// Returns whether a record was actually removed.
    pub async fn remove_rule(
        &self,
        opctx: &OpContext,
        rule: &Rule,
    ) -> Result<bool, Error> {
        match self.store.rule_delete(opctx, rule).await {
            Ok(()) => Ok(true),
            Err(Error::ObjectNotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Deletes every tuple matching a partial positional pattern, returning
    /// how many were removed (zero is success: idempotent unbind)
    pub async fn remove_filtered(
        &self,
        opctx: &OpContext,
        filter: &RuleFilter,
    ) -> Result<usize, Error> {
        self.store.rules_delete_matching(opctx, filter).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_statement_tuple_round_trip() {
        let statement =
            PolicyStatement::new("rol-base", "ns/*", "get", Effect::Allow);
        let rule = statement_to_rule(&statement);
        assert_eq!(rule.ptype, "p");
        assert_eq!(rule.values, vec!["rol-base", "ns/*", "get", "allow"]);
        assert_eq!(rule_to_statement(&rule).unwrap(), statement);
    }

    #[test]
    fn test_edge_tuple_keeps_empty_domain() {
        let rule = edge_to_rule("u1", "rol-base", "");
        assert_eq!(rule.values, vec!["u1", "rol-base", ""]);
        let (member, role, domain) = rule_to_edge(&rule).unwrap();
        assert_eq!((member.as_str(), role.as_str(), domain.as_str()),
            ("u1", "rol-base", ""));
    }

    #[test]
    fn test_malformed_tuples_are_errors() {
        let rule = Rule::new("p", vec![String::from("u1")]);
        assert_matches!(
            rule_to_statement(&rule),
            Err(Error::InternalError { .. })
        );
        let rule = Rule::new(
            "p",
            vec![
                String::from("u1"),
                String::from("ns/*"),
                String::from("get"),
                String::from("maybe"),
            ],
        );
        assert_matches!(
            rule_to_statement(&rule),
            Err(Error::InvalidValue { .. })
        );
        let rule = Rule::new("g", vec![String::from("u1")]);
        assert_matches!(rule_to_edge(&rule), Err(Error::InternalError { .. }));
    }
}
