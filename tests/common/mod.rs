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

#![allow(dead_code)]

//! Shared test support: tracing setup, a recording agent handler, and
//! schema fixtures.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use oef_runtime::agent::AgentHandler;
use oef_runtime::protocol::{CfpPayload, OefOperation, ProposePayload};
use oef_runtime::schema::{
    Attribute, AttributeType, Constraint, ConstraintExpr, ConstraintType, DataModel, Instance,
    QueryModel, RelationOp, Value,
};

static INIT_TRACING: Once = Once::new();

/// Installs a fmt subscriber honouring `RUST_LOG`. Safe to call from every
/// test; only the first call wins.
pub fn initialize_tracing() {
    INIT_TRACING.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Everything an agent callback can observe, as data.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    OefError {
        answer_id: u32,
        operation: OefOperation,
    },
    DialogueError {
        answer_id: u32,
        dialogue_id: u32,
        origin: String,
    },
    SearchResult {
        search_id: u32,
        agents: Vec<String>,
    },
    Message {
        answer_id: u32,
        dialogue_id: u32,
        origin: String,
        content: Vec<u8>,
    },
    Cfp {
        answer_id: u32,
        dialogue_id: u32,
        origin: String,
        target: u32,
        constraints: CfpPayload,
    },
    Propose {
        answer_id: u32,
        dialogue_id: u32,
        origin: String,
        target: u32,
        proposals: ProposePayload,
    },
    Accept {
        answer_id: u32,
        dialogue_id: u32,
        origin: String,
        target: u32,
    },
    Decline {
        answer_id: u32,
        dialogue_id: u32,
        origin: String,
        target: u32,
    },
}

/// A handler that forwards every callback into a channel the test can await.
pub struct RecordingAgent {
    events: mpsc::UnboundedSender<AgentEvent>,
}

/// Creates a recording handler and the receiver for its events.
pub fn recording_agent() -> (Arc<RecordingAgent>, mpsc::UnboundedReceiver<AgentEvent>) {
    let (events, receiver) = mpsc::unbounded_channel();
    (Arc::new(RecordingAgent { events }), receiver)
}

impl AgentHandler for RecordingAgent {
    fn on_oef_error(&self, answer_id: u32, operation: OefOperation) {
        let _ = self.events.send(AgentEvent::OefError {
            answer_id,
            operation,
        });
    }

    fn on_dialogue_error(&self, answer_id: u32, dialogue_id: u32, origin: &str) {
        let _ = self.events.send(AgentEvent::DialogueError {
            answer_id,
            dialogue_id,
            origin: origin.to_string(),
        });
    }

    fn on_search_result(&self, search_id: u32, agents: &[String]) {
        let _ = self.events.send(AgentEvent::SearchResult {
            search_id,
            agents: agents.to_vec(),
        });
    }

    fn on_message(&self, answer_id: u32, dialogue_id: u32, origin: &str, content: &[u8]) {
        let _ = self.events.send(AgentEvent::Message {
            answer_id,
            dialogue_id,
            origin: origin.to_string(),
            content: content.to_vec(),
        });
    }

    fn on_cfp(
        &self,
        answer_id: u32,
        dialogue_id: u32,
        origin: &str,
        target: u32,
        constraints: &CfpPayload,
    ) {
        let _ = self.events.send(AgentEvent::Cfp {
            answer_id,
            dialogue_id,
            origin: origin.to_string(),
            target,
            constraints: constraints.clone(),
        });
    }

    fn on_propose(
        &self,
        answer_id: u32,
        dialogue_id: u32,
        origin: &str,
        target: u32,
        proposals: &ProposePayload,
    ) {
        let _ = self.events.send(AgentEvent::Propose {
            answer_id,
            dialogue_id,
            origin: origin.to_string(),
            target,
            proposals: proposals.clone(),
        });
    }

    fn on_accept(&self, answer_id: u32, dialogue_id: u32, origin: &str, target: u32) {
        let _ = self.events.send(AgentEvent::Accept {
            answer_id,
            dialogue_id,
            origin: origin.to_string(),
            target,
        });
    }

    fn on_decline(&self, answer_id: u32, dialogue_id: u32, origin: &str, target: u32) {
        let _ = self.events.send(AgentEvent::Decline {
            answer_id,
            dialogue_id,
            origin: origin.to_string(),
            target,
        });
    }
}

/// Awaits the next event, failing the test after one second.
pub async fn next_event(receiver: &mut mpsc::UnboundedReceiver<AgentEvent>) -> AgentEvent {
    timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("timed out waiting for an agent event")
        .expect("event channel closed")
}

/// Asserts that no event arrives within a grace period.
pub async fn assert_no_event(receiver: &mut mpsc::UnboundedReceiver<AgentEvent>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        receiver.try_recv().is_err(),
        "expected no event to be delivered"
    );
}

/// The weather-station data model used by the discovery scenarios.
pub fn station_model() -> DataModel {
    DataModel::new(
        "weather_station",
        vec![
            Attribute::new("manufacturer", AttributeType::Str, true),
            Attribute::new("wireless", AttributeType::Bool, true),
        ],
    )
}

/// A station instance advertising the given manufacturer and capability.
pub fn station_instance(manufacturer: &str, wireless: bool) -> Instance {
    Instance::new(
        station_model(),
        HashMap::from([
            (
                "manufacturer".to_string(),
                Value::Str(manufacturer.to_string()),
            ),
            ("wireless".to_string(), Value::Bool(wireless)),
        ]),
    )
    .expect("valid station instance")
}

/// A query matching wireless stations.
pub fn wireless_query() -> QueryModel {
    QueryModel::new(vec![ConstraintExpr::Constraint(Constraint::new(
        "wireless",
        ConstraintType::Relation {
            op: RelationOp::Eq,
            value: Value::Bool(true),
        },
    ))])
}
