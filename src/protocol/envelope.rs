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

//! Wire envelopes: the tagged records exchanged between agents and broker.
//!
//! Every frame carries exactly one envelope. Client→server traffic uses
//! [`ClientEnvelope`], server→agent traffic [`ServerEnvelope`]; both sides
//! carry an answer id the peer can use to correlate error replies. The
//! negotiation sub-protocol (CFP / Propose / Accept / Decline) travels inside
//! a [`FipaMessage`]. Unknown fields are ignored on decode, which is what
//! versions this schema.

use serde::{Deserialize, Serialize};

use crate::schema::{Instance, QueryModel};

/// Default TCP port agents connect to.
pub const AGENTS_PORT: u16 = 3333;

/// Operations an [`ServerEnvelope::OefError`] can refer to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OefOperation {
    /// Registering an agent description.
    RegisterDescription,
    /// Clearing an agent description.
    UnregisterDescription,
    /// Registering a service description.
    RegisterService,
    /// Unregistering a service description.
    UnregisterService,
    /// Searching agent descriptions.
    SearchAgents,
    /// Searching service descriptions.
    SearchServices,
    /// Sending a peer-to-peer message.
    SendMessage,
}

/// Constraints attached to a call-for-proposal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub enum CfpPayload {
    /// No constraints.
    #[default]
    Nothing,
    /// Opaque constraint bytes, interpreted by the receiving agent.
    Bytes(Vec<u8>),
    /// A structured query the proposals should satisfy.
    Query(QueryModel),
}

/// Proposals attached to a propose message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ProposePayload {
    /// Opaque proposal bytes, interpreted by the receiving agent.
    Bytes(Vec<u8>),
    /// Structured service descriptions offered to the peer.
    Instances(Vec<Instance>),
}

/// Body of a negotiation message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum FipaBody {
    /// Call for proposals.
    Cfp(CfpPayload),
    /// Proposals answering a CFP.
    Propose(ProposePayload),
    /// Acceptance of a proposal.
    Accept,
    /// Rejection of a proposal.
    Decline,
}

/// One step of the negotiation protocol.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FipaMessage {
    /// Message id of the peer message this one answers.
    pub target: u32,
    /// The negotiation step.
    pub body: FipaBody,
}

/// Payload of a peer-to-peer message: raw bytes or a negotiation step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum MessagePayload {
    /// Opaque application bytes.
    Bytes(Vec<u8>),
    /// A negotiation message.
    Fipa(FipaMessage),
}

/// Client→server envelope.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ClientEnvelope {
    /// Set the agent description used by agent searches.
    RegisterDescription {
        /// Caller-supplied correlation id.
        msg_id: u32,
        /// The description.
        description: Instance,
    },
    /// Clear the agent description.
    UnregisterDescription {
        /// Caller-supplied correlation id.
        msg_id: u32,
    },
    /// Advertise a service description.
    RegisterService {
        /// Caller-supplied correlation id.
        msg_id: u32,
        /// The service description.
        service: Instance,
    },
    /// Withdraw a service description.
    UnregisterService {
        /// Caller-supplied correlation id.
        msg_id: u32,
        /// The service description.
        service: Instance,
    },
    /// Search agent descriptions.
    SearchAgents {
        /// Caller-supplied correlation id, echoed in the answer.
        search_id: u32,
        /// The predicate.
        query: QueryModel,
    },
    /// Search service descriptions.
    SearchServices {
        /// Caller-supplied correlation id, echoed in the answer.
        search_id: u32,
        /// The predicate.
        query: QueryModel,
    },
    /// Send a message to another agent.
    SendMessage {
        /// Caller-supplied correlation id.
        msg_id: u32,
        /// Dialogue the message belongs to.
        dialogue_id: u32,
        /// Public key of the recipient.
        destination: String,
        /// Message payload.
        payload: MessagePayload,
    },
}

impl ClientEnvelope {
    /// The operation this envelope requests, for error reporting.
    #[must_use]
    pub const fn operation(&self) -> OefOperation {
        match self {
            Self::RegisterDescription { .. } => OefOperation::RegisterDescription,
            Self::UnregisterDescription { .. } => OefOperation::UnregisterDescription,
            Self::RegisterService { .. } => OefOperation::RegisterService,
            Self::UnregisterService { .. } => OefOperation::UnregisterService,
            Self::SearchAgents { .. } => OefOperation::SearchAgents,
            Self::SearchServices { .. } => OefOperation::SearchServices,
            Self::SendMessage { .. } => OefOperation::SendMessage,
        }
    }
}

/// Server→agent envelope.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ServerEnvelope {
    /// An operation failed inside the broker.
    OefError {
        /// Correlation id of the failed operation.
        answer_id: u32,
        /// The operation that failed.
        operation: OefOperation,
    },
    /// A message could not be delivered to its dialogue peer.
    DialogueError {
        /// Correlation id of the undeliverable message.
        answer_id: u32,
        /// Dialogue the message belonged to.
        dialogue_id: u32,
        /// Public key of the original sender.
        origin: String,
    },
    /// Answer to a search.
    Agents {
        /// Correlation id of the search.
        answer_id: u32,
        /// Matching agent public keys.
        agents: Vec<String>,
    },
    /// A message from another agent.
    Content {
        /// Correlation id chosen by the sender.
        answer_id: u32,
        /// Dialogue the message belongs to.
        dialogue_id: u32,
        /// Public key of the sender.
        origin: String,
        /// Message payload.
        payload: MessagePayload,
    },
}

/// First handshake step: the agent announces its public key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentIdentity {
    /// The agent's public key.
    pub public_key: String,
}

/// Second handshake step: the broker challenges the agent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServerPhrase {
    /// The challenge phrase.
    pub phrase: String,
    /// Set when the broker refuses the session outright.
    pub failure: bool,
}

/// Third handshake step: the agent answers the challenge.
///
/// The expected answer is the byte-reversed phrase. This is a placeholder
/// for a signed nonce exchange; real deployments must replace it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentAnswer {
    /// The challenge answer.
    pub answer: String,
}

/// Final handshake step: the broker's verdict.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServerConnected {
    /// Whether the session is established.
    pub status: bool,
}

/// The answer the broker expects to its challenge phrase.
#[must_use]
pub fn expected_answer(phrase: &str) -> String {
    phrase.chars().rev().collect()
}
