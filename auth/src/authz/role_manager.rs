// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The directed role-inheritance graph
//!
//! Nodes are keyed as `"<domain>::<name>"` so that edges never cross domain
//! boundaries.  Reachability queries are bounded by a fixed maximum depth
//! chosen at construction time; there is no cycle detection beyond that
//! bound, which is a deliberate simplification -- a cyclic graph simply
//! exhausts its depth budget and reports no link.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::RwLock;
use tessera_common::api::external::Error;
use tessera_common::api::external::ListResultVec;
use tessera_common::api::external::LookupType;
use tessera_common::api::external::ResourceType;

/// Default bound on transitive role-hierarchy walks
pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 10;

/// Maintains the directed role-inheritance graph and answers membership and
/// reachability queries
///
/// All operations are safe to call concurrently: the graph lives behind a
/// readers-writer lock, so many `has_link`/`get_roles` reads proceed in
/// parallel while `add_link`/`delete_link` writes are serialized.
pub struct RoleManager {
    max_depth: usize,
    /// node key -> outgoing edge set (duplicate edges suppressed by the set)
    graph: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

fn node_key(domain: &str, name: &str) -> String {
    format!("{}::{}", domain, name)
}

fn node_name(key: &str) -> &str {
    // keys are always produced by node_key
    key.split_once("::").map(|(_, name)| name).unwrap_or(key)
}

impl RoleManager {
    pub fn new(max_depth: usize) -> RoleManager {
        RoleManager { max_depth, graph: RwLock::new(BTreeMap::new()) }
    }

    /// Adds the directed edge `member -> role` within `domain`
    ///
    /// Both endpoints are created if they do not exist yet.  Re-adding an
    /// existing edge is a no-op; the return value says whether the graph
    /// changed.
    pub fn add_link(&self, member: &str, role: &str, domain: &str) -> bool {
        let member_key = node_key(domain, member);
        let role_key = node_key(domain, role);
        let mut graph = self.graph.write().unwrap();
        graph.entry(role_key.clone()).or_default();
        graph.entry(member_key).or_default().insert(role_key)
    }

    /// Removes the directed edge `member -> role` within `domain`
    ///
    /// Fails with `ObjectNotFound` if either endpoint is unknown or the edge
    /// does not exist.
    pub fn delete_link(
        &self,
        member: &str,
        role: &str,
        domain: &str,
    ) -> Result<(), Error> {
        let member_key = node_key(domain, member);
        let role_key = node_key(domain, role);
        let mut graph = self.graph.write().unwrap();
        if !graph.contains_key(&role_key) {
            return Err(LookupType::ByCompositeId(role_key)
                .into_not_found(ResourceType::Role));
        }
        let Some(edges) = graph.get_mut(&member_key) else {
            return Err(LookupType::ByCompositeId(member_key)
                .into_not_found(ResourceType::Role));
        };
        if !edges.remove(&role_key) {
            return Err(LookupType::ByCompositeId(format!(
                "{} -> {}",
                member_key, role_key
            ))
            .into_not_found(ResourceType::Role));
        }
        Ok(())
    }

    /// Reports whether `role` is reachable from `member` within `domain`
    ///
    /// The walk is bounded by the configured maximum hierarchy depth, so it
    /// terminates even on cyclic graphs.  Unknown endpoints simply report no
    /// link.
    pub fn has_link(&self, member: &str, role: &str, domain: &str) -> bool {
        if member == role {
            return true;
        }
        let member_key = node_key(domain, member);
        let role_key = node_key(domain, role);
        let graph = self.graph.read().unwrap();
        if !graph.contains_key(&member_key) || !graph.contains_key(&role_key)
        {
            return false;
        }
        Self::reachable(&graph, &member_key, &role_key, self.max_depth)
    }

    fn reachable(
        graph: &BTreeMap<String, BTreeSet<String>>,
        from: &str,
        to: &str,
        depth: usize,
    ) -> bool {
        if depth == 0 {
            return false;
        }
        let Some(edges) = graph.get(from) else {
            return false;
        };
        for edge in edges {
            if edge == to
                || Self::reachable(graph, edge, to, depth - 1)
            {
                return true;
            }
        }
        false
    }

    /// Returns `member`'s direct roles, plus one level of roles reachable
    /// through same-domain role aliases, excluding `member` itself
    ///
    /// "Alias" here means a direct role whose name is itself a node in the
    /// same domain: that node's own direct roles are included.  This is a
    /// single extra level by design, not a transitive closure -- use
    /// [`RoleManager::has_link`] for reachability.
    pub fn get_roles(&self, member: &str, domain: &str) -> Vec<String> {
        let member_key = node_key(domain, member);
        let graph = self.graph.read().unwrap();
        let Some(edges) = graph.get(&member_key) else {
            return Vec::new();
        };

        let mut roles: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        let direct: Vec<&String> = edges.iter().collect();
        for role_key in &direct {
            let name = node_name(role_key);
            if name != member && seen.insert(name.to_owned()) {
                roles.push(name.to_owned());
            }
        }
        for role_key in &direct {
            if let Some(aliased) = graph.get(role_key.as_str()) {
                for role_key in aliased {
                    let name = node_name(role_key);
                    if name != member && seen.insert(name.to_owned()) {
                        roles.push(name.to_owned());
                    }
                }
            }
        }
        roles
    }

    /// Returns every member with a direct edge into `role` within `domain`
    ///
    /// Fails with `ObjectNotFound` if `role` is unknown.
    pub fn get_users(
        &self,
        role: &str,
        domain: &str,
    ) -> ListResultVec<String> {
        let role_key = node_key(domain, role);
        let graph = self.graph.read().unwrap();
        if !graph.contains_key(&role_key) {
            return Err(LookupType::ByCompositeId(role_key)
                .into_not_found(ResourceType::Role));
        }
        let prefix = node_key(domain, "");
        Ok(graph
            .iter()
            .filter(|(key, edges)| {
                key.starts_with(&prefix) && edges.contains(&role_key)
            })
            .map(|(key, _)| node_name(key).to_owned())
            .collect())
    }

    /// Enumerates every edge in the graph as `(member, role, domain)`
    ///
    /// Used by the rule adapter when rewriting the persisted rule set.
    pub fn all_links(&self) -> Vec<(String, String, String)> {
        let graph = self.graph.read().unwrap();
        let mut links = Vec::new();
        for (member_key, edges) in graph.iter() {
            let (domain, member) =
                member_key.split_once("::").unwrap_or(("", member_key));
            for role_key in edges {
                links.push((
                    member.to_owned(),
                    node_name(role_key).to_owned(),
                    domain.to_owned(),
                ));
            }
        }
        links
    }

    /// Resets to an empty graph (used before a full reload)
    pub fn clear(&self) {
        self.graph.write().unwrap().clear();
    }
}

impl Default for RoleManager {
    fn default() -> Self {
        RoleManager::new(DEFAULT_MAX_HIERARCHY_DEPTH)
    }
}

#[cfg(test)]
mod test {
    use super::RoleManager;
    use assert_matches::assert_matches;
    use tessera_common::api::external::Error;

    #[test]
    fn test_add_link_is_idempotent() {
        let rm = RoleManager::default();
        assert!(rm.add_link("u1", "rol-admin", "t1"));
        assert!(!rm.add_link("u1", "rol-admin", "t1"));
        assert_eq!(rm.get_roles("u1", "t1"), vec!["rol-admin"]);
    }

    #[test]
    fn test_domains_are_isolated() {
        let rm = RoleManager::default();
        rm.add_link("u1", "rol-admin", "t1");
        assert!(rm.has_link("u1", "rol-admin", "t1"));
        assert!(!rm.has_link("u1", "rol-admin", "t2"));
        assert!(rm.get_roles("u1", "t2").is_empty());
        // the empty domain is a valid global scope
        rm.add_link("u1", "rol-base", "");
        assert!(rm.has_link("u1", "rol-base", ""));
    }

    #[test]
    fn test_transitive_reachability() {
        let rm = RoleManager::default();
        rm.add_link("u1", "rol-admin", "");
        rm.add_link("rol-admin", "rol-base", "");
        assert!(rm.has_link("u1", "rol-base", ""));
        assert!(rm.has_link("u1", "u1", ""));
        assert!(!rm.has_link("rol-base", "u1", ""));
    }

    #[test]
    fn test_cycle_terminates_within_depth_bound() {
        let rm = RoleManager::new(3);
        rm.add_link("a", "b", "");
        rm.add_link("b", "c", "");
        rm.add_link("c", "a", "");
        // a cycle: the walk must terminate and report correctly
        assert!(rm.has_link("a", "c", ""));
        assert!(rm.has_link("c", "b", ""));
        assert!(!rm.has_link("a", "unknown", ""));

        // a chain longer than the depth bound is not reachable
        let rm = RoleManager::new(2);
        rm.add_link("n0", "n1", "");
        rm.add_link("n1", "n2", "");
        rm.add_link("n2", "n3", "");
        assert!(rm.has_link("n0", "n2", ""));
        assert!(!rm.has_link("n0", "n3", ""));
    }

    #[test]
    fn test_delete_link_requires_known_endpoints() {
        let rm = RoleManager::default();
        rm.add_link("u1", "rol-admin", "t1");
        assert_matches!(
            rm.delete_link("u1", "rol-missing", "t1"),
            Err(Error::ObjectNotFound { .. })
        );
        assert_matches!(
            rm.delete_link("u2", "rol-admin", "t1"),
            Err(Error::ObjectNotFound { .. })
        );
        assert!(rm.delete_link("u1", "rol-admin", "t1").is_ok());
        assert!(!rm.has_link("u1", "rol-admin", "t1"));
        // the edge is gone now
        assert_matches!(
            rm.delete_link("u1", "rol-admin", "t1"),
            Err(Error::ObjectNotFound { .. })
        );
    }

    #[test]
    fn test_get_roles_includes_one_alias_level() {
        let rm = RoleManager::default();
        rm.add_link("u1", "rol-admin", "t1");
        rm.add_link("rol-admin", "rol-base", "t1");
        rm.add_link("rol-base", "rol-root", "t1");
        let roles = rm.get_roles("u1", "t1");
        // direct role plus its direct roles, but not the full closure
        assert_eq!(roles, vec!["rol-admin", "rol-base"]);
        assert!(rm.get_roles("missing", "t1").is_empty());
    }

    #[test]
    fn test_get_users_is_reverse_lookup() {
        let rm = RoleManager::default();
        rm.add_link("u1", "rol-admin", "t1");
        rm.add_link("u2", "rol-admin", "t1");
        rm.add_link("u3", "rol-base", "t1");
        let users = rm.get_users("rol-admin", "t1").unwrap();
        assert_eq!(users, vec!["u1", "u2"]);
        assert_matches!(
            rm.get_users("rol-missing", "t1"),
            Err(Error::ObjectNotFound { .. })
        );
    }

    #[test]
    fn test_clear_resets_graph() {
        let rm = RoleManager::default();
        rm.add_link("u1", "rol-admin", "t1");
        rm.clear();
        assert!(!rm.has_link("u1", "rol-admin", "t1"));
        assert!(rm.all_links().is_empty());
    }

    #[test]
    fn test_all_links_round_trips_domains() {
        let rm = RoleManager::default();
        rm.add_link("u1", "rol-admin", "t1");
        rm.add_link("u1", "rol-base", "");
        let mut links = rm.all_links();
        links.sort();
        assert_eq!(
            links,
            vec![
                (
                    String::from("u1"),
                    String::from("rol-admin"),
                    String::from("t1")
                ),
                (
                    String::from("u1"),
                    String::from("rol-base"),
                    String::from("")
                ),
            ]
        );
    }
}
