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

#![forbid(unsafe_code)]
#![forbid(missing_docs)] // Keep this to enforce coverage

//! # OEF Runtime
//!
//! This crate provides the core of an Open Economic Framework
//! agent-communication runtime, built on top of Tokio: a broker that many
//! autonomous agents connect to, advertise descriptions and services on,
//! discover each other through structured queries, and exchange
//! peer-to-peer messages over — including the FIPA negotiation protocol
//! (CFP → Propose → Accept/Decline).
//!
//! ## Key Concepts
//!
//! - **Broker (`broker`)**: TCP listener plus the [`scheduler::Scheduler`]
//!   core — session table, service directory, and the single dispatch
//!   worker that serialises callbacks per agent.
//! - **Agents (`agent::Agent`)**: a user-defined [`agent::AgentHandler`]
//!   bound to a transport proxy.
//! - **Transports**: [`agent::LocalProxy`] calls the scheduler in-process;
//!   [`agent::NetworkProxy`] speaks length-prefixed frames over TCP behind
//!   a challenge/response handshake.
//! - **Dialogues (`dialogue`)**: numbered conversations between two agents,
//!   each with its own monotonically increasing message id.
//! - **Discovery (`schema`, `directory`)**: agents are found by running
//!   [`schema::QueryModel`] predicates over advertised
//!   [`schema::Instance`]s.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use oef_runtime::prelude::*;
//!
//! let handle = oef_runtime::broker::run(OefConfig::default()).await?;
//! let proxy = NetworkProxy::connect("Agent1", "127.0.0.1", handle.local_addr().port(), &OefConfig::default()).await?;
//! let agent = Agent::new(Box::new(proxy), my_handler);
//! agent.start().await?;
//! ```

/// Agent side: callbacks, transport proxies, and the agent base.
pub mod agent;

/// TCP broker: accept loop, server handshake, per-session handling.
pub mod broker;

/// Runtime configuration.
pub mod config;

/// Wire frame to typed callback dispatch.
pub mod decoder;

/// Dialogue registry.
pub mod dialogue;

/// Service directory.
pub mod directory;

/// Crate error types.
pub mod error;

/// Framing and wire envelopes.
pub mod protocol;

/// Descriptions and discovery queries.
pub mod schema;

/// The broker core: sessions, directory, dispatch worker.
pub mod scheduler;

/// A prelude module for conveniently importing the most commonly used items.
pub mod prelude {
    pub use crate::agent::{Agent, AgentHandler, LocalProxy, NetworkProxy, OefProxy};
    pub use crate::broker::{run as run_broker, BrokerHandle, BrokerStats};
    pub use crate::config::OefConfig;
    pub use crate::dialogue::{Dialogue, Dialogues};
    pub use crate::error::OefError;
    pub use crate::protocol::{
        CfpPayload, ClientEnvelope, FipaBody, FipaMessage, MessagePayload, OefOperation,
        ProposePayload, ServerEnvelope, AGENTS_PORT,
    };
    pub use crate::schema::{
        Attribute, AttributeType, Constraint, ConstraintExpr, ConstraintType, DataModel, Instance,
        QueryModel, RelationOp, SetOp, Value,
    };
    pub use crate::scheduler::Scheduler;
}
