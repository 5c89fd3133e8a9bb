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

//! In-process transport: agent operations as direct scheduler calls.
//!
//! Peer traffic is wrapped into the same server→agent envelopes the broker
//! would produce, with `origin` set to this agent's key, so callbacks are
//! indistinguishable from the network transport's.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::agent::{AgentHandler, OefProxy};
use crate::error::OefError;
use crate::protocol::{
    CfpPayload, FipaBody, FipaMessage, MessagePayload, ProposePayload, ServerEnvelope,
};
use crate::scheduler::Scheduler;
use crate::schema::{Instance, QueryModel};

/// Adapter from agent operations to direct [`Scheduler`] calls.
pub struct LocalProxy {
    public_key: String,
    scheduler: Arc<Scheduler>,
}

impl LocalProxy {
    /// Creates a proxy for `public_key` against an in-process scheduler.
    #[must_use]
    pub fn new(public_key: impl Into<String>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            public_key: public_key.into(),
            scheduler,
        }
    }

    async fn send_content(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        payload: MessagePayload,
    ) -> Result<(), OefError> {
        let envelope = ServerEnvelope::Content {
            answer_id: msg_id,
            dialogue_id,
            origin: self.public_key.clone(),
            payload,
        };
        let frame = serde_json::to_vec(&envelope)?;
        self.scheduler
            .send_to(&self.public_key, dest, msg_id, dialogue_id, frame)
            .await
    }

    async fn answer_search(&self, search_id: u32, agents: Vec<String>) -> Result<(), OefError> {
        let answer = ServerEnvelope::Agents {
            answer_id: search_id,
            agents,
        };
        let frame = serde_json::to_vec(&answer)?;
        self.scheduler.send(&self.public_key, frame).await
    }
}

#[async_trait]
impl OefProxy for LocalProxy {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn handshake(&self) -> bool {
        self.scheduler.connect(&self.public_key)
    }

    fn bind(&self, agent: Arc<dyn AgentHandler>) {
        if let Err(e) = self.scheduler.bind_handler(&self.public_key, agent) {
            error!(public_key = %self.public_key, error = %e, "bind failed");
        }
    }

    async fn stop(&self) {
        self.scheduler.disconnect(&self.public_key);
    }

    async fn register_description(
        &self,
        _msg_id: u32,
        description: Instance,
    ) -> Result<(), OefError> {
        self.scheduler
            .register_description(&self.public_key, description)
    }

    async fn unregister_description(&self, _msg_id: u32) -> Result<(), OefError> {
        self.scheduler.unregister_description(&self.public_key)
    }

    async fn register_service(&self, _msg_id: u32, service: Instance) -> Result<(), OefError> {
        self.scheduler.register_service(&self.public_key, &service)
    }

    async fn unregister_service(&self, _msg_id: u32, service: Instance) -> Result<(), OefError> {
        self.scheduler
            .unregister_service(&self.public_key, &service)
    }

    async fn search_agents(&self, search_id: u32, query: QueryModel) -> Result<(), OefError> {
        let agents = self.scheduler.search_agents(search_id, &query);
        self.answer_search(search_id, agents).await
    }

    async fn search_services(&self, search_id: u32, query: QueryModel) -> Result<(), OefError> {
        let agents = self.scheduler.search_services(search_id, &query);
        self.answer_search(search_id, agents).await
    }

    async fn send_message(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        content: Vec<u8>,
    ) -> Result<(), OefError> {
        self.send_content(msg_id, dialogue_id, dest, MessagePayload::Bytes(content))
            .await
    }

    async fn send_cfp(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
        constraints: CfpPayload,
    ) -> Result<(), OefError> {
        let payload = MessagePayload::Fipa(FipaMessage {
            target,
            body: FipaBody::Cfp(constraints),
        });
        self.send_content(msg_id, dialogue_id, dest, payload).await
    }

    async fn send_propose(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
        proposals: ProposePayload,
    ) -> Result<(), OefError> {
        let payload = MessagePayload::Fipa(FipaMessage {
            target,
            body: FipaBody::Propose(proposals),
        });
        self.send_content(msg_id, dialogue_id, dest, payload).await
    }

    async fn send_accept(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError> {
        let payload = MessagePayload::Fipa(FipaMessage {
            target,
            body: FipaBody::Accept,
        });
        self.send_content(msg_id, dialogue_id, dest, payload).await
    }

    async fn send_decline(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError> {
        let payload = MessagePayload::Fipa(FipaMessage {
            target,
            body: FipaBody::Decline,
        });
        self.send_content(msg_id, dialogue_id, dest, payload).await
    }
}
