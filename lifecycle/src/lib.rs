// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Finalizer-driven two-phase deletion, shared by every policy-bearing
//! resource kind
//!
//! A resource with pending cleanup obligations (finalizers) is never
//! physically removed on the first delete request.  Instead, one guarded
//! update stamps the deletion marker, flips the phase to `Terminating`, and
//! reconciles the standard dependent-handling finalizers -- all conditional
//! on the generation the caller read, so two racing deletes cannot both
//! win.  External cleanup agents then clear their finalizer entries; once
//! the list is empty, a subsequent delete removes the object for real.
//!
//! The controller is generic over [`StoredObject`], the closed set of
//! resource kinds in this subsystem, rather than dispatching on a runtime
//! type tag.

pub mod pool;

use crate::pool::ParallelTaskSet;
use chrono::Utc;
use slog::info;
use slog::warn;
use std::sync::Arc;
use tessera_auth::context::OpContext;
use tessera_auth::storage::ListSelector;
use tessera_auth::storage::ObjectStore;
use tessera_auth::storage::StoredObject;
use tessera_common::api::external::Error;
use tessera_common::api::external::ListResultVec;
use tessera_common::api::external::Phase;
use tessera_common::api::external::UpdateResult;

/// Finalizer set when a delete orphans its dependents
pub const FINALIZER_ORPHAN_DEPENDENTS: &str = "tessera.io/orphan-dependents";
/// Finalizer set when a delete must wait for dependents to be removed
pub const FINALIZER_DELETE_DEPENDENTS: &str = "tessera.io/delete-dependents";

/// How a delete request treats the object's dependents
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropagationPolicy {
    /// leave dependents in place; cleanup agents adopt them
    Orphan,
    /// dependents are cleaned up asynchronously after the object goes away
    Background,
    /// the object stays until its dependents are gone
    Foreground,
}

#[derive(Clone, Copy, Debug)]
pub struct DeleteOptions {
    pub propagation: PropagationPolicy,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        DeleteOptions { propagation: PropagationPolicy::Background }
    }
}

/// What a delete request accomplished
#[derive(Clone, Debug)]
pub enum DeleteOutcome<T> {
    /// the object was marked for deletion and remains visible pending
    /// finalizer cleanup
    Terminating(T),
    /// the object was physically removed
    Removed,
}

/// Generic two-phase delete for one resource kind
pub struct LifecycleController<T: StoredObject> {
    store: Arc<dyn ObjectStore<T>>,
    delete_parallelism: usize,
}

impl<T: StoredObject> LifecycleController<T> {
    /// `delete_parallelism` bounds the worker pool used by
    /// [`LifecycleController::delete_collection`]; zero is clamped to one.
    pub fn new(
        store: Arc<dyn ObjectStore<T>>,
        delete_parallelism: usize,
    ) -> LifecycleController<T> {
        LifecycleController {
            store,
            delete_parallelism: delete_parallelism.max(1),
        }
    }

    /// Processes one delete request for `id`
    ///
    /// - no finalizers pending: physical removal, guarded by the generation
    ///   we read
    /// - finalizers pending, phase `Active`: one conditional update stamps
    ///   `time_deleted`, flips the phase, and reconciles the dependent
    ///   finalizers per `options`; the still-present object is returned
    /// - finalizers pending, phase already `Terminating`: `Conflict`
    pub async fn delete(
        &self,
        opctx: &OpContext,
        id: &str,
        options: DeleteOptions,
    ) -> Result<DeleteOutcome<T>, Error> {
        Self::delete_one(
            Arc::clone(&self.store),
            opctx.clone(),
            id.to_owned(),
            options,
        )
        .await
    }

    async fn delete_one(
        store: Arc<dyn ObjectStore<T>>,
        opctx: OpContext,
        id: String,
        options: DeleteOptions,
    ) -> Result<DeleteOutcome<T>, Error> {
        let current = store.get(&opctx, &id).await?;

        if current.finalizers().is_empty() {
            store
                .delete(&opctx, &id, Some(current.generation()))
                .await?;
            info!(opctx.log, "physically deleted object";
                "resource_type" => %T::RESOURCE_TYPE,
                "id" => id.as_str(),
            );
            return Ok(DeleteOutcome::Removed);
        }

        match current.phase() {
            Phase::Active => {
                let generation = current.generation();
                let mut updated = current;
                let identity = updated.identity_mut();
                identity.time_deleted = Some(Utc::now());
                identity.phase = Phase::Terminating;
                reconcile_dependent_finalizers(
                    &mut identity.finalizers,
                    options.propagation,
                );
                let updated = store
                    .update(&opctx, updated, Some(generation))
                    .await?;
                info!(opctx.log, "marked object terminating";
                    "resource_type" => %T::RESOURCE_TYPE,
                    "id" => id.as_str(),
                    "finalizers" => ?updated.finalizers(),
                );
                Ok(DeleteOutcome::Terminating(updated))
            }
            Phase::Terminating => Err(Error::conflict(&format!(
                "{} {:?} cannot be deleted yet: cleanup is still pending \
                 for finalizers {:?}",
                T::RESOURCE_TYPE,
                id,
                current.finalizers(),
            ))),
        }
    }

    /// Adds a cleanup obligation; re-adding an existing one is a no-op
    pub async fn finalizer_add(
        &self,
        opctx: &OpContext,
        id: &str,
        finalizer: &str,
    ) -> UpdateResult<T> {
        let current = self.store.get(opctx, id).await?;
        if current.finalizers().iter().any(|f| f == finalizer) {
            return Ok(current);
        }
        let generation = current.generation();
        let mut updated = current;
        updated.identity_mut().finalizers.push(finalizer.to_owned());
        self.store.update(opctx, updated, Some(generation)).await
    }

    /// Clears one cleanup obligation, typically called by the external
    /// agent that owns it; clearing an absent one is a no-op
    pub async fn finalizer_remove(
        &self,
        opctx: &OpContext,
        id: &str,
        finalizer: &str,
    ) -> UpdateResult<T> {
        let current = self.store.get(opctx, id).await?;
        if !current.finalizers().iter().any(|f| f == finalizer) {
            return Ok(current);
        }
        let generation = current.generation();
        let mut updated = current;
        let remaining = updated
            .identity()
            .finalizers
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();
        updated.identity_mut().finalizers = remaining;
        self.store.update(opctx, updated, Some(generation)).await
    }

    /// Deletes every object matching `selector`, fanning out across a
    /// bounded worker pool
    ///
    /// Per-object outcomes are independent: objects with finalizers move to
    /// `Terminating` while the rest are removed.  The first error (if any)
    /// is reported after all workers finish; already-applied deletions are
    /// not rolled back.  On success the originally-listed objects are
    /// returned.
    pub async fn delete_collection(
        &self,
        opctx: &OpContext,
        selector: &ListSelector,
        options: DeleteOptions,
    ) -> ListResultVec<T> {
        let objects = self.store.list(opctx, selector).await?;
        let batch_opctx = opctx.child("batch-delete");
        let mut pool = ParallelTaskSet::new(self.delete_parallelism);
        for object in &objects {
            let store = Arc::clone(&self.store);
            let opctx = batch_opctx.clone();
            let id = object.id().to_owned();
            pool.spawn(async move {
                Self::delete_one(store, opctx, id, options).await
            });
        }

        let mut first_error = None;
        for result in pool.join_all().await {
            // flatten pool-level failures (worker panics) and per-object
            // delete failures
            let error = match result {
                Ok(Ok(_)) => continue,
                Ok(Err(error)) => error,
                Err(error) => error,
            };
            warn!(batch_opctx.log, "batch delete worker failed";
                "resource_type" => %T::RESOURCE_TYPE,
                "error" => %error,
            );
            if first_error.is_none() {
                first_error = Some(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(objects),
        }
    }
}

/// Reconciles the two standard dependent-handling finalizers against the
/// requested propagation policy
///
/// Builds the new list and assigns it once.
fn reconcile_dependent_finalizers(
    finalizers: &mut Vec<String>,
    propagation: PropagationPolicy,
) {
    let mut updated: Vec<String> = finalizers
        .iter()
        .filter(|f| {
            f.as_str() != FINALIZER_ORPHAN_DEPENDENTS
                && f.as_str() != FINALIZER_DELETE_DEPENDENTS
        })
        .cloned()
        .collect();
    match propagation {
        PropagationPolicy::Orphan => {
            updated.push(FINALIZER_ORPHAN_DEPENDENTS.to_owned());
        }
        PropagationPolicy::Foreground => {
            updated.push(FINALIZER_DELETE_DEPENDENTS.to_owned());
        }
        PropagationPolicy::Background => {}
    }
    *finalizers = updated;
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use tessera_common::api::external::Generation;
    use tessera_common::api::external::ObjectIdentity;
    use tessera_common::api::external::Role;
    use tessera_test_utils::dev;
    use tessera_test_utils::mem::MemStore;

    fn role(id: &str, finalizers: &[&str]) -> Role {
        Role {
            identity: ObjectIdentity::new(id, "t1").with_finalizers(
                finalizers.iter().map(|f| (*f).to_owned()).collect(),
            ),
            display_name: String::from("test role"),
            policies: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
        }
    }

    async fn setup(
        log: &slog::Logger,
        objects: &[Role],
    ) -> (Arc<MemStore<Role>>, LifecycleController<Role>, OpContext) {
        let opctx = OpContext::for_tests(log.clone());
        let store = Arc::new(MemStore::new());
        for object in objects {
            store.create(&opctx, object.clone()).await.unwrap();
        }
        let controller = LifecycleController::new(
            Arc::clone(&store) as Arc<dyn ObjectStore<Role>>,
            4,
        );
        (store, controller, opctx)
    }

    #[tokio::test]
    async fn test_finalizer_gate() {
        let logctx = dev::test_setup_log("test_finalizer_gate");
        let (store, controller, opctx) =
            setup(&logctx.log, &[role("rol-1", &["role"])]).await;

        // first delete: marked terminating, still retrievable
        let outcome = controller
            .delete(&opctx, "rol-1", DeleteOptions::default())
            .await
            .unwrap();
        let marked = match outcome {
            DeleteOutcome::Terminating(role) => role,
            other => panic!("expected Terminating, got {:?}", other),
        };
        assert_eq!(marked.identity.phase, Phase::Terminating);
        assert!(marked.identity.time_deleted.is_some());
        let fetched = store.get(&opctx, "rol-1").await.unwrap();
        assert_eq!(fetched.identity.phase, Phase::Terminating);

        // second delete while the finalizer is pending: conflict
        let error = controller
            .delete(&opctx, "rol-1", DeleteOptions::default())
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        // the cleanup agent clears its finalizer; delete then purges
        controller
            .finalizer_remove(&opctx, "rol-1", "role")
            .await
            .unwrap();
        let outcome = controller
            .delete(&opctx, "rol-1", DeleteOptions::default())
            .await
            .unwrap();
        assert_matches!(outcome, DeleteOutcome::Removed);
        assert_matches!(
            store.get(&opctx, "rol-1").await,
            Err(Error::ObjectNotFound { .. })
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_is_immediate() {
        let logctx =
            dev::test_setup_log("test_delete_without_finalizers_is_immediate");
        let (store, controller, opctx) =
            setup(&logctx.log, &[role("rol-1", &[])]).await;
        let outcome = controller
            .delete(&opctx, "rol-1", DeleteOptions::default())
            .await
            .unwrap();
        assert_matches!(outcome, DeleteOutcome::Removed);
        assert!(store.is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_propagation_policies_reconcile_finalizers() {
        let logctx = dev::test_setup_log(
            "test_propagation_policies_reconcile_finalizers",
        );
        let cases = [
            (
                PropagationPolicy::Orphan,
                vec!["role", FINALIZER_ORPHAN_DEPENDENTS],
            ),
            (
                PropagationPolicy::Foreground,
                vec!["role", FINALIZER_DELETE_DEPENDENTS],
            ),
            (PropagationPolicy::Background, vec!["role"]),
        ];
        for (propagation, expected) in cases {
            // a stale flag from a previous request gets replaced
            let (_store, controller, opctx) = setup(
                &logctx.log,
                &[role("rol-1", &["role", FINALIZER_DELETE_DEPENDENTS])],
            )
            .await;
            let outcome = controller
                .delete(&opctx, "rol-1", DeleteOptions { propagation })
                .await
                .unwrap();
            let marked = match outcome {
                DeleteOutcome::Terminating(role) => role,
                other => panic!("expected Terminating, got {:?}", other),
            };
            assert_eq!(marked.identity.finalizers, expected);
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_stale_generation_conflicts() {
        let logctx = dev::test_setup_log("test_stale_generation_conflicts");
        let (store, controller, opctx) =
            setup(&logctx.log, &[role("rol-1", &["role"])]).await;

        // another writer bumps the generation between our read and update
        let mut raced = store.get(&opctx, "rol-1").await.unwrap();
        raced.display_name = String::from("renamed");
        store
            .update(&opctx, raced, Some(Generation::new()))
            .await
            .unwrap();

        // a write conditioned on the stale generation fails
        let error = store
            .delete(&opctx, "rol-1", Some(Generation::new()))
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        // the controller re-reads before conditioning, so it is unaffected
        let outcome = controller
            .delete(&opctx, "rol-1", DeleteOptions::default())
            .await
            .unwrap();
        assert_matches!(outcome, DeleteOutcome::Terminating(_));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_finalizer_add_registers_obligation() {
        let logctx =
            dev::test_setup_log("test_finalizer_add_registers_obligation");
        let (_store, controller, opctx) =
            setup(&logctx.log, &[role("rol-1", &[])]).await;

        let updated = controller
            .finalizer_add(&opctx, "rol-1", "backup")
            .await
            .unwrap();
        assert_eq!(updated.identity.finalizers, vec!["backup"]);
        let generation = updated.identity.generation;

        // re-adding is a no-op and does not bump the generation
        let updated = controller
            .finalizer_add(&opctx, "rol-1", "backup")
            .await
            .unwrap();
        assert_eq!(updated.identity.finalizers, vec!["backup"]);
        assert_eq!(updated.identity.generation, generation);

        // the new obligation gates deletion
        let outcome = controller
            .delete(&opctx, "rol-1", DeleteOptions::default())
            .await
            .unwrap();
        assert_matches!(outcome, DeleteOutcome::Terminating(_));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_delete_collection_mixes_outcomes() {
        let logctx =
            dev::test_setup_log("test_delete_collection_mixes_outcomes");
        let objects: Vec<Role> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    role(&format!("rol-{}", i), &[])
                } else {
                    role(&format!("rol-{}", i), &["role"])
                }
            })
            .collect();
        let (store, controller, opctx) = setup(&logctx.log, &objects).await;

        let listed = controller
            .delete_collection(
                &opctx,
                &ListSelector::in_tenant("t1"),
                DeleteOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 20);

        // even ids had no finalizers and are gone; odd ids remain,
        // terminating
        let remaining =
            store.list(&opctx, &ListSelector::all()).await.unwrap();
        assert_eq!(remaining.len(), 10);
        assert!(remaining
            .iter()
            .all(|r| r.identity.phase == Phase::Terminating));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_delete_collection_reports_first_error() {
        let logctx = dev::test_setup_log(
            "test_delete_collection_reports_first_error",
        );
        let (store, controller, opctx) = setup(
            &logctx.log,
            &[role("rol-0", &[]), role("rol-1", &["role"])],
        )
        .await;

        // put rol-1 into Terminating first so the batch delete conflicts
        // on it
        controller
            .delete(&opctx, "rol-1", DeleteOptions::default())
            .await
            .unwrap();
        let error = controller
            .delete_collection(
                &opctx,
                &ListSelector::all(),
                DeleteOptions::default(),
            )
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        // rol-0 was still deleted: no rollback of applied work
        assert_matches!(
            store.get(&opctx, "rol-0").await,
            Err(Error::ObjectNotFound { .. })
        );
        logctx.cleanup_successful();
    }
}
