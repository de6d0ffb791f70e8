// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronized facade over the policy engine and its rule adapter
//!
//! Authorization checks take the read lock and may proceed concurrently;
//! every mutation of the statement set or role graph takes the write lock,
//! as do `load_policy` and `save_policy`, so the destructive full rewrite
//! can never interleave with an incremental auto-save write or observe a
//! half-applied graph change.
//!
//! Mutations write durable state first (through the adapter) and apply the
//! in-memory change only after the write succeeds, so the rule store remains
//! authoritative if a storage call fails partway.

use crate::authz::adapter::edge_to_rule;
use crate::authz::adapter::statement_to_rule;
use crate::authz::adapter::RuleAdapter;
use crate::authz::adapter::PTYPE_GROUPING;
use crate::authz::adapter::PTYPE_POLICY;
use crate::authz::engine::AccessRequest;
use crate::authz::engine::Decision;
use crate::authz::engine::Engine;
use crate::authz::engine::PolicyStatement;
use crate::context::OpContext;
use crate::storage::RuleFilter;
use tessera_common::api::external::Error;
use tessera_common::api::external::ListResultVec;
use tokio::sync::RwLock;

pub struct Enforcer {
    engine: RwLock<Engine>,
    adapter: RuleAdapter,
    /// when set, every incremental mutation is written through to the rule
    /// store; when clear, callers persist explicitly via `save_policy`
    auto_save: bool,
}

impl Enforcer {
    pub fn new(engine: Engine, adapter: RuleAdapter) -> Enforcer {
        Enforcer { engine: RwLock::new(engine), adapter, auto_save: true }
    }

    pub fn with_auto_save(mut self, auto_save: bool) -> Enforcer {
        self.auto_save = auto_save;
        self
    }

    /// Evaluates an access request
    ///
    /// "No opinion" and "deny" are both normal return values; the only error
    /// case is a malformed request missing a required identifier.
    pub async fn enforce(
        &self,
        request: &AccessRequest<'_>,
    ) -> Result<Decision, Error> {
        if request.subject.is_empty() {
            return Err(Error::invalid_request(
                "access request has no subject",
            ));
        }
        if request.object.is_empty() || request.action.is_empty() {
            return Err(Error::invalid_request(
                "access request has no object or no action",
            ));
        }
        Ok(self.engine.read().await.enforce(request))
    }

    /// Full resync: clears the in-memory model and replays every persisted
    /// tuple
    pub async fn load_policy(&self, opctx: &OpContext) -> Result<(), Error> {
        let mut engine = self.engine.write().await;
        engine.clear();
        self.adapter.load_policy(opctx, &mut engine).await
    }

    /// Destructive full rewrite of the rule store from the in-memory model
    ///
    /// Holding the write lock for the duration is what makes this safe
    /// against concurrent incremental writers in this process.
    pub async fn save_policy(&self, opctx: &OpContext) -> Result<(), Error> {
        let engine = self.engine.write().await;
        self.adapter.save_policy(opctx, &engine).await
    }

    pub async fn add_statement(
        &self,
        opctx: &OpContext,
        statement: PolicyStatement,
    ) -> Result<bool, Error> {
        let mut engine = self.engine.write().await;
        if self.auto_save {
            self.adapter
                .add_rule(opctx, statement_to_rule(&statement))
                .await?;
        }
        Ok(engine.add_statement(statement))
    }

    pub async fn remove_statement(
        &self,
        opctx: &OpContext,
        statement: &PolicyStatement,
    ) -> Result<bool, Error> {
        let mut engine = self.engine.write().await;
        if self.auto_save {
            self.adapter
                .remove_rule(opctx, &statement_to_rule(statement))
                .await?;
        }
        Ok(engine.remove_statement(statement))
    }

    /// Removes every statement matching a partial positional pattern
    pub async fn remove_filtered_statements(
        &self,
        opctx: &OpContext,
        field_index: usize,
        values: &[&str],
    ) -> Result<usize, Error> {
        let mut engine = self.engine.write().await;
        if self.auto_save {
            let filter = RuleFilter::new(PTYPE_POLICY, field_index, values);
            self.adapter.remove_filtered(opctx, &filter).await?;
        }
        Ok(engine.remove_filtered_statements(field_index, values))
    }

    /// Adds the grouping edge `member -> role` within `domain`
    ///
    /// Returns whether the graph changed; re-adding an existing edge is a
    /// no-op both in memory and in the store.
    pub async fn add_grouping(
        &self,
        opctx: &OpContext,
        member: &str,
        role: &str,
        domain: &str,
    ) -> Result<bool, Error> {
        let engine = self.engine.write().await;
        if self.auto_save {
            self.adapter
                .add_rule(opctx, edge_to_rule(member, role, domain))
                .await?;
        }
        Ok(engine.roles().add_link(member, role, domain))
    }

    /// Removes the grouping edge `member -> role` within `domain`
    ///
    /// Removing an absent edge is a no-op (idempotent unbind).
    pub async fn remove_grouping(
        &self,
        opctx: &OpContext,
        member: &str,
        role: &str,
        domain: &str,
    ) -> Result<bool, Error> {
        let engine = self.engine.write().await;
        if self.auto_save {
            self.adapter
                .remove_rule(opctx, &edge_to_rule(member, role, domain))
                .await?;
        }
        match engine.roles().delete_link(member, role, domain) {
            Ok(()) => Ok(true),
            Err(Error::ObjectNotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Removes every grouping edge matching a partial positional pattern
    /// (used to drop all edges touching a deleted subject or role)
    ///
    /// Returns how many durable records were removed.
    pub async fn remove_filtered_groupings(
        &self,
        opctx: &OpContext,
        field_index: usize,
        values: &[&str],
    ) -> Result<usize, Error> {
        let engine = self.engine.write().await;
        let filter = RuleFilter::new(PTYPE_GROUPING, field_index, values);
        let removed = if self.auto_save {
            self.adapter.remove_filtered(opctx, &filter).await?
        } else {
            0
        };
        for (member, role, domain) in engine.roles().all_links() {
            if filter.matches(&edge_to_rule(&member, &role, &domain)) {
                // the edge was just enumerated, so it exists
                engine.roles().delete_link(&member, &role, &domain)?;
            }
        }
        Ok(removed)
    }

    pub async fn has_role(
        &self,
        member: &str,
        role: &str,
        domain: &str,
    ) -> bool {
        self.engine.read().await.roles().has_link(member, role, domain)
    }

    pub async fn get_roles(&self, member: &str, domain: &str) -> Vec<String> {
        self.engine.read().await.roles().get_roles(member, domain)
    }

    pub async fn get_users(
        &self,
        role: &str,
        domain: &str,
    ) -> ListResultVec<String> {
        self.engine.read().await.roles().get_users(role, domain)
    }
}
