// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory implementations of the storage seams
//!
//! These behave like the real collaborators as far as this subsystem can
//! tell: generation bumping on update, `Conflict` on a failed precondition,
//! `AlreadyExists` on duplicate creation, and positional filtering over rule
//! tuples.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tessera_auth::context::OpContext;
use tessera_auth::storage::Directory;
use tessera_auth::storage::ListSelector;
use tessera_auth::storage::ObjectStore;
use tessera_auth::storage::RuleFilter;
use tessera_auth::storage::RuleStore;
use tessera_auth::storage::StoredObject;
use tessera_common::api::external::CreateResult;
use tessera_common::api::external::DeleteResult;
use tessera_common::api::external::Error;
use tessera_common::api::external::Generation;
use tessera_common::api::external::ListResultVec;
use tessera_common::api::external::LookupResult;
use tessera_common::api::external::LookupType;
use tessera_common::api::external::ResourceType;
use tessera_common::api::external::Rule;
use tessera_common::api::external::RuleRecord;
use tessera_common::api::external::Subject;
use tessera_common::api::external::UpdateResult;
use uuid::Uuid;

/// In-memory [`ObjectStore`] for one resource kind
pub struct MemStore<T: StoredObject> {
    objects: Mutex<BTreeMap<String, T>>,
}

impl<T: StoredObject> MemStore<T> {
    pub fn new() -> MemStore<T> {
        MemStore { objects: Mutex::new(BTreeMap::new()) }
    }

    /// Number of stored objects (for assertions)
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: StoredObject> Default for MemStore<T> {
    fn default() -> Self {
        MemStore::new()
    }
}

fn check_precondition(
    type_name: ResourceType,
    id: &str,
    current: Generation,
    precondition: Option<Generation>,
) -> Result<(), Error> {
    if let Some(expected) = precondition {
        if expected != current {
            return Err(Error::conflict(&format!(
                "{} {:?}: generation {} does not match expected {}",
                type_name, id, current, expected
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl<T: StoredObject> ObjectStore<T> for MemStore<T> {
    async fn get(&self, _opctx: &OpContext, id: &str) -> LookupResult<T> {
        self.objects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(T::RESOURCE_TYPE, id))
    }

    async fn list(
        &self,
        _opctx: &OpContext,
        selector: &ListSelector,
    ) -> ListResultVec<T> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|object| selector.matches(object.identity()))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        _opctx: &OpContext,
        object: T,
    ) -> CreateResult<T> {
        let mut objects = self.objects.lock().unwrap();
        let id = object.id().to_owned();
        if objects.contains_key(&id) {
            return Err(Error::ObjectAlreadyExists {
                type_name: T::RESOURCE_TYPE,
                object_name: id,
            });
        }
        objects.insert(id, object.clone());
        Ok(object)
    }

    async fn update(
        &self,
        _opctx: &OpContext,
        object: T,
        precondition: Option<Generation>,
    ) -> UpdateResult<T> {
        let mut objects = self.objects.lock().unwrap();
        let id = object.id().to_owned();
        let current = objects
            .get(&id)
            .ok_or_else(|| Error::not_found_by_id(T::RESOURCE_TYPE, &id))?;
        check_precondition(
            T::RESOURCE_TYPE,
            &id,
            current.generation(),
            precondition,
        )?;
        let mut updated = object;
        updated.identity_mut().generation = current.generation().next();
        objects.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete(
        &self,
        _opctx: &OpContext,
        id: &str,
        precondition: Option<Generation>,
    ) -> DeleteResult {
        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(id)
            .ok_or_else(|| Error::not_found_by_id(T::RESOURCE_TYPE, id))?;
        check_precondition(
            T::RESOURCE_TYPE,
            id,
            current.generation(),
            precondition,
        )?;
        objects.remove(id);
        Ok(())
    }
}

/// In-memory [`RuleStore`]
pub struct MemRuleStore {
    records: Mutex<Vec<RuleRecord>>,
}

impl MemRuleStore {
    pub fn new() -> MemRuleStore {
        MemRuleStore { records: Mutex::new(Vec::new()) }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemRuleStore {
    fn default() -> Self {
        MemRuleStore::new()
    }
}

#[async_trait]
impl RuleStore for MemRuleStore {
    async fn rule_create(
        &self,
        _opctx: &OpContext,
        rule: Rule,
    ) -> CreateResult<RuleRecord> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|record| record.rule == rule) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::RuleRecord,
                object_name: rule.to_string(),
            });
        }
        let record = RuleRecord { id: Uuid::new_v4(), rule };
        records.push(record.clone());
        Ok(record)
    }

    async fn rule_list(
        &self,
        _opctx: &OpContext,
    ) -> ListResultVec<RuleRecord> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn rule_delete(
        &self,
        _opctx: &OpContext,
        rule: &Rule,
    ) -> DeleteResult {
        let mut records = self.records.lock().unwrap();
        let position = records
            .iter()
            .position(|record| &record.rule == rule)
            .ok_or_else(|| {
                LookupType::ByCompositeId(rule.to_string())
                    .into_not_found(ResourceType::RuleRecord)
            })?;
        records.remove(position);
        Ok(())
    }

    async fn rules_delete_matching(
        &self,
        _opctx: &OpContext,
        filter: &RuleFilter,
    ) -> Result<usize, Error> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|record| !filter.matches(&record.rule));
        Ok(before - records.len())
    }

    async fn rules_delete_all(&self, _opctx: &OpContext) -> DeleteResult {
        self.records.lock().unwrap().clear();
        Ok(())
    }
}

/// A [`Directory`] with a fixed set of users and groups per tenant
pub struct FixedDirectory {
    users: Mutex<Vec<(String, Subject)>>,
    groups: Mutex<Vec<(String, Subject)>>,
}

impl FixedDirectory {
    pub fn new() -> FixedDirectory {
        FixedDirectory {
            users: Mutex::new(Vec::new()),
            groups: Mutex::new(Vec::new()),
        }
    }

    pub fn add_user(&self, tenant_id: &str, id: &str, name: &str) {
        self.users
            .lock()
            .unwrap()
            .push((tenant_id.to_owned(), Subject::new(id, name)));
    }

    pub fn add_group(&self, tenant_id: &str, id: &str, name: &str) {
        self.groups
            .lock()
            .unwrap()
            .push((tenant_id.to_owned(), Subject::new(id, name)));
    }
}

impl Default for FixedDirectory {
    fn default() -> Self {
        FixedDirectory::new()
    }
}

fn directory_lookup(
    entries: &Mutex<Vec<(String, Subject)>>,
    type_name: ResourceType,
    tenant_id: &str,
    lookup: LookupType,
) -> LookupResult<Subject> {
    let entries = entries.lock().unwrap();
    entries
        .iter()
        .find(|(tenant, subject)| {
            tenant == tenant_id
                && match &lookup {
                    LookupType::ById(id) => {
                        subject.id.as_deref() == Some(id.as_str())
                    }
                    LookupType::ByName(name) => {
                        subject.name.as_deref() == Some(name.as_str())
                    }
                    LookupType::ByCompositeId(_) => false,
                }
        })
        .map(|(_, subject)| subject.clone())
        .ok_or_else(|| lookup.into_not_found(type_name))
}

#[async_trait]
impl Directory for FixedDirectory {
    async fn user_by_name(
        &self,
        _opctx: &OpContext,
        tenant_id: &str,
        name: &str,
    ) -> LookupResult<Subject> {
        directory_lookup(
            &self.users,
            ResourceType::User,
            tenant_id,
            LookupType::ByName(name.to_owned()),
        )
    }

    async fn user_by_id(
        &self,
        _opctx: &OpContext,
        tenant_id: &str,
        id: &str,
    ) -> LookupResult<Subject> {
        directory_lookup(
            &self.users,
            ResourceType::User,
            tenant_id,
            LookupType::ById(id.to_owned()),
        )
    }

    async fn group_by_name(
        &self,
        _opctx: &OpContext,
        tenant_id: &str,
        name: &str,
    ) -> LookupResult<Subject> {
        directory_lookup(
            &self.groups,
            ResourceType::Group,
            tenant_id,
            LookupType::ByName(name.to_owned()),
        )
    }

    async fn group_by_id(
        &self,
        _opctx: &OpContext,
        tenant_id: &str,
        id: &str,
    ) -> LookupResult<Subject> {
        directory_lookup(
            &self.groups,
            ResourceType::Group,
            tenant_id,
            LookupType::ById(id.to_owned()),
        )
    }
}
