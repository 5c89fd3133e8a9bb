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

//! Agent side: callbacks, transport proxies, and the agent base.
//!
//! An [`Agent`] binds a user-defined [`AgentHandler`] to an [`OefProxy`].
//! The proxy carries every operation either straight into an in-process
//! scheduler ([`LocalProxy`]) or over framed TCP to a broker
//! ([`NetworkProxy`]); the agent surface is identical for both, which is
//! what makes local and network deployments interchangeable in tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OefError;
use crate::protocol::{CfpPayload, OefOperation, ProposePayload};
use crate::schema::{Instance, QueryModel};

pub use local::LocalProxy;
pub use network::NetworkProxy;

/// In-process transport.
mod local;

/// Framed-TCP transport.
mod network;

/// The callback set an agent exposes to the runtime.
///
/// Callbacks for one agent are always invoked serially. They run on the
/// dispatch path and must not block indefinitely. All methods default to
/// no-ops so implementors only write the callbacks they care about.
pub trait AgentHandler: Send + Sync {
    /// An operation failed inside the broker.
    fn on_oef_error(&self, _answer_id: u32, _operation: OefOperation) {}

    /// A message could not be delivered to its dialogue peer.
    fn on_dialogue_error(&self, _answer_id: u32, _dialogue_id: u32, _origin: &str) {}

    /// A search answer arrived.
    fn on_search_result(&self, _search_id: u32, _agents: &[String]) {}

    /// A peer sent raw message bytes.
    fn on_message(&self, _answer_id: u32, _dialogue_id: u32, _origin: &str, _content: &[u8]) {}

    /// A peer opened or continued a negotiation with a call for proposals.
    fn on_cfp(
        &self,
        _answer_id: u32,
        _dialogue_id: u32,
        _origin: &str,
        _target: u32,
        _constraints: &CfpPayload,
    ) {
    }

    /// A peer answered a CFP with proposals.
    fn on_propose(
        &self,
        _answer_id: u32,
        _dialogue_id: u32,
        _origin: &str,
        _target: u32,
        _proposals: &ProposePayload,
    ) {
    }

    /// A peer accepted a proposal.
    fn on_accept(&self, _answer_id: u32, _dialogue_id: u32, _origin: &str, _target: u32) {}

    /// A peer declined a proposal.
    fn on_decline(&self, _answer_id: u32, _dialogue_id: u32, _origin: &str, _target: u32) {}
}

/// Transport adapter between an agent and the broker core.
///
/// Implementations serialise concurrent sends so frames never interleave,
/// and deliver inbound traffic to the handler passed to [`bind`](Self::bind).
#[async_trait]
pub trait OefProxy: Send + Sync {
    /// The agent's public key.
    fn public_key(&self) -> &str;

    /// Runs the connection handshake to a terminal state.
    ///
    /// Returns `true` once the session is established. Any I/O error,
    /// timeout, or refusal yields `false`.
    async fn handshake(&self) -> bool;

    /// Binds the callback receiver and arms the receive path. Traffic
    /// received before `bind` is not dispatched.
    fn bind(&self, agent: Arc<dyn AgentHandler>);

    /// Closes the session. Queued frames to this agent are dropped at
    /// dispatch.
    async fn stop(&self);

    /// Sets the description used by agent searches.
    async fn register_description(&self, msg_id: u32, description: Instance)
        -> Result<(), OefError>;

    /// Clears the description.
    async fn unregister_description(&self, msg_id: u32) -> Result<(), OefError>;

    /// Advertises a service description.
    async fn register_service(&self, msg_id: u32, service: Instance) -> Result<(), OefError>;

    /// Withdraws a service description.
    async fn unregister_service(&self, msg_id: u32, service: Instance) -> Result<(), OefError>;

    /// Searches agent descriptions; the answer arrives via
    /// [`AgentHandler::on_search_result`].
    async fn search_agents(&self, search_id: u32, query: QueryModel) -> Result<(), OefError>;

    /// Searches service descriptions; the answer arrives via
    /// [`AgentHandler::on_search_result`].
    async fn search_services(&self, search_id: u32, query: QueryModel) -> Result<(), OefError>;

    /// Sends raw message bytes to a peer.
    async fn send_message(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        content: Vec<u8>,
    ) -> Result<(), OefError>;

    /// Sends a call for proposals to a peer.
    async fn send_cfp(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
        constraints: CfpPayload,
    ) -> Result<(), OefError>;

    /// Sends proposals to a peer.
    async fn send_propose(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
        proposals: ProposePayload,
    ) -> Result<(), OefError>;

    /// Accepts a peer's proposal.
    async fn send_accept(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError>;

    /// Declines a peer's proposal.
    async fn send_decline(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError>;
}

/// An agent: a proxy bound to a user-defined callback receiver.
///
/// Operations delegate 1:1 to the proxy with a caller-supplied message id;
/// inbound traffic reaches the handler once [`start`](Self::start) has
/// completed.
pub struct Agent {
    proxy: Box<dyn OefProxy>,
    handler: Arc<dyn AgentHandler>,
}

impl Agent {
    /// Creates an agent from a transport proxy and a callback receiver.
    #[must_use]
    pub fn new(proxy: Box<dyn OefProxy>, handler: Arc<dyn AgentHandler>) -> Self {
        Self { proxy, handler }
    }

    /// The agent's public key.
    #[must_use]
    pub fn public_key(&self) -> &str {
        self.proxy.public_key()
    }

    /// Performs the handshake and arms the receive path.
    ///
    /// # Errors
    ///
    /// Returns [`OefError::HandshakeFailed`] when the broker refuses the
    /// session or the handshake does not complete.
    pub async fn start(&self) -> Result<(), OefError> {
        if !self.proxy.handshake().await {
            return Err(OefError::HandshakeFailed);
        }
        self.proxy.bind(self.handler.clone());
        Ok(())
    }

    /// Closes the session.
    pub async fn stop(&self) {
        self.proxy.stop().await;
    }

    /// See [`OefProxy::register_description`].
    pub async fn register_description(
        &self,
        msg_id: u32,
        description: Instance,
    ) -> Result<(), OefError> {
        self.proxy.register_description(msg_id, description).await
    }

    /// See [`OefProxy::unregister_description`].
    pub async fn unregister_description(&self, msg_id: u32) -> Result<(), OefError> {
        self.proxy.unregister_description(msg_id).await
    }

    /// See [`OefProxy::register_service`].
    pub async fn register_service(&self, msg_id: u32, service: Instance) -> Result<(), OefError> {
        self.proxy.register_service(msg_id, service).await
    }

    /// See [`OefProxy::unregister_service`].
    pub async fn unregister_service(&self, msg_id: u32, service: Instance) -> Result<(), OefError> {
        self.proxy.unregister_service(msg_id, service).await
    }

    /// See [`OefProxy::search_agents`].
    pub async fn search_agents(&self, search_id: u32, query: QueryModel) -> Result<(), OefError> {
        self.proxy.search_agents(search_id, query).await
    }

    /// See [`OefProxy::search_services`].
    pub async fn search_services(&self, search_id: u32, query: QueryModel) -> Result<(), OefError> {
        self.proxy.search_services(search_id, query).await
    }

    /// See [`OefProxy::send_message`].
    pub async fn send_message(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        content: Vec<u8>,
    ) -> Result<(), OefError> {
        self.proxy
            .send_message(msg_id, dialogue_id, dest, content)
            .await
    }

    /// See [`OefProxy::send_cfp`].
    pub async fn send_cfp(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
        constraints: CfpPayload,
    ) -> Result<(), OefError> {
        self.proxy
            .send_cfp(msg_id, dialogue_id, dest, target, constraints)
            .await
    }

    /// See [`OefProxy::send_propose`].
    pub async fn send_propose(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
        proposals: ProposePayload,
    ) -> Result<(), OefError> {
        self.proxy
            .send_propose(msg_id, dialogue_id, dest, target, proposals)
            .await
    }

    /// See [`OefProxy::send_accept`].
    pub async fn send_accept(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError> {
        self.proxy
            .send_accept(msg_id, dialogue_id, dest, target)
            .await
    }

    /// See [`OefProxy::send_decline`].
    pub async fn send_decline(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError> {
        self.proxy
            .send_decline(msg_id, dialogue_id, dest, target)
            .await
    }
}
