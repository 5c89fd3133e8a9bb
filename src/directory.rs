/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Service directory: the broker's index from service descriptions to the
//! agents advertising them.

use std::collections::BTreeSet;

use tracing::trace;

use crate::schema::{Instance, QueryModel};

struct DirectoryEntry {
    service: Instance,
    agents: BTreeSet<String>,
}

/// In-memory index from service [`Instance`]s to agent public keys.
///
/// An agent may advertise any number of services; a service may be
/// advertised by any number of agents. Buckets are dropped as soon as their
/// last agent unregisters.
#[derive(Default)]
pub struct ServiceDirectory {
    entries: Vec<DirectoryEntry>,
}

impl ServiceDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct registered service descriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `agent_key` under `service`.
    ///
    /// Returns `false` when the agent already advertises this exact service;
    /// the directory is unchanged in that case.
    pub fn register(&mut self, service: &Instance, agent_key: &str) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| &e.service == service) {
            return entry.agents.insert(agent_key.to_string());
        }
        self.entries.push(DirectoryEntry {
            service: service.clone(),
            agents: BTreeSet::from([agent_key.to_string()]),
        });
        trace!(agent_key, size = self.entries.len(), "service registered");
        true
    }

    /// Removes `agent_key` from the bucket of `service`.
    ///
    /// Returns `false` when the agent did not advertise this service. The
    /// bucket is deleted once its last agent is removed.
    pub fn unregister(&mut self, service: &Instance, agent_key: &str) -> bool {
        let Some(index) = self.entries.iter().position(|e| &e.service == service) else {
            return false;
        };
        let removed = self.entries[index].agents.remove(agent_key);
        if removed && self.entries[index].agents.is_empty() {
            self.entries.remove(index);
        }
        removed
    }

    /// Removes `agent_key` from every bucket. Used when a session ends.
    pub fn unregister_all(&mut self, agent_key: &str) {
        self.entries.retain_mut(|entry| {
            entry.agents.remove(agent_key);
            !entry.agents.is_empty()
        });
    }

    /// Every agent key whose any advertised service satisfies `query`,
    /// deduplicated and in lexicographic order.
    #[must_use]
    pub fn query(&self, query: &QueryModel) -> Vec<String> {
        let mut keys = BTreeSet::new();
        for entry in &self.entries {
            if query.check(&entry.service) {
                keys.extend(entry.agents.iter().cloned());
            }
        }
        keys.into_iter().collect()
    }
}
