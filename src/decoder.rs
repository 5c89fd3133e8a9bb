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

//! Message decoding: one wire frame in, one typed callback out.
//!
//! [`decode`] parses a server→agent envelope and invokes the matching
//! [`AgentHandler`] callback. It is a pure function of the payload and the
//! target agent; callers decide what to do with a decoding error — both
//! dispatch loops log it and drop the frame, so a malformed payload never
//! tears down a session.

use tracing::trace;

use crate::agent::AgentHandler;
use crate::error::OefError;
use crate::protocol::{FipaBody, MessagePayload, ServerEnvelope};

/// Decodes `payload` and dispatches it to `agent`'s callbacks.
///
/// # Errors
///
/// Returns [`OefError::Serialization`] when the payload is not a valid
/// envelope. The agent is untouched in that case.
pub fn decode(public_key: &str, payload: &[u8], agent: &dyn AgentHandler) -> Result<(), OefError> {
    let envelope: ServerEnvelope = serde_json::from_slice(payload)?;
    match envelope {
        ServerEnvelope::OefError {
            answer_id,
            operation,
        } => {
            trace!(public_key, answer_id, ?operation, "decode oef error");
            agent.on_oef_error(answer_id, operation);
        }
        ServerEnvelope::DialogueError {
            answer_id,
            dialogue_id,
            origin,
        } => {
            trace!(public_key, answer_id, dialogue_id, %origin, "decode dialogue error");
            agent.on_dialogue_error(answer_id, dialogue_id, &origin);
        }
        ServerEnvelope::Agents { answer_id, agents } => {
            trace!(
                public_key,
                answer_id,
                count = agents.len(),
                "decode search result"
            );
            agent.on_search_result(answer_id, &agents);
        }
        ServerEnvelope::Content {
            answer_id,
            dialogue_id,
            origin,
            payload,
        } => match payload {
            MessagePayload::Bytes(content) => {
                trace!(public_key, answer_id, dialogue_id, %origin, "decode message");
                agent.on_message(answer_id, dialogue_id, &origin, &content);
            }
            MessagePayload::Fipa(fipa) => {
                let target = fipa.target;
                match fipa.body {
                    FipaBody::Cfp(constraints) => {
                        trace!(public_key, answer_id, dialogue_id, %origin, target, "decode cfp");
                        agent.on_cfp(answer_id, dialogue_id, &origin, target, &constraints);
                    }
                    FipaBody::Propose(proposals) => {
                        trace!(public_key, answer_id, dialogue_id, %origin, target, "decode propose");
                        agent.on_propose(answer_id, dialogue_id, &origin, target, &proposals);
                    }
                    FipaBody::Accept => {
                        trace!(public_key, answer_id, dialogue_id, %origin, target, "decode accept");
                        agent.on_accept(answer_id, dialogue_id, &origin, target);
                    }
                    FipaBody::Decline => {
                        trace!(public_key, answer_id, dialogue_id, %origin, target, "decode decline");
                        agent.on_decline(answer_id, dialogue_id, &origin, target);
                    }
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CfpPayload, FipaMessage, OefOperation, ProposePayload};
    use parking_lot::Mutex;

    #[derive(Debug, PartialEq)]
    enum Event {
        OefError(u32, OefOperation),
        DialogueError(u32, u32, String),
        SearchResult(u32, Vec<String>),
        Message(u32, u32, String, Vec<u8>),
        Cfp(u32, u32, String, u32, CfpPayload),
        Propose(u32, u32, String, u32, ProposePayload),
        Accept(u32, u32, String, u32),
        Decline(u32, u32, String, u32),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl AgentHandler for Recorder {
        fn on_oef_error(&self, answer_id: u32, operation: OefOperation) {
            self.events.lock().push(Event::OefError(answer_id, operation));
        }
        fn on_dialogue_error(&self, answer_id: u32, dialogue_id: u32, origin: &str) {
            self.events.lock().push(Event::DialogueError(
                answer_id,
                dialogue_id,
                origin.to_string(),
            ));
        }
        fn on_search_result(&self, search_id: u32, agents: &[String]) {
            self.events
                .lock()
                .push(Event::SearchResult(search_id, agents.to_vec()));
        }
        fn on_message(&self, answer_id: u32, dialogue_id: u32, origin: &str, content: &[u8]) {
            self.events.lock().push(Event::Message(
                answer_id,
                dialogue_id,
                origin.to_string(),
                content.to_vec(),
            ));
        }
        fn on_cfp(
            &self,
            answer_id: u32,
            dialogue_id: u32,
            origin: &str,
            target: u32,
            constraints: &CfpPayload,
        ) {
            self.events.lock().push(Event::Cfp(
                answer_id,
                dialogue_id,
                origin.to_string(),
                target,
                constraints.clone(),
            ));
        }
        fn on_propose(
            &self,
            answer_id: u32,
            dialogue_id: u32,
            origin: &str,
            target: u32,
            proposals: &ProposePayload,
        ) {
            self.events.lock().push(Event::Propose(
                answer_id,
                dialogue_id,
                origin.to_string(),
                target,
                proposals.clone(),
            ));
        }
        fn on_accept(&self, answer_id: u32, dialogue_id: u32, origin: &str, target: u32) {
            self.events.lock().push(Event::Accept(
                answer_id,
                dialogue_id,
                origin.to_string(),
                target,
            ));
        }
        fn on_decline(&self, answer_id: u32, dialogue_id: u32, origin: &str, target: u32) {
            self.events.lock().push(Event::Decline(
                answer_id,
                dialogue_id,
                origin.to_string(),
                target,
            ));
        }
    }

    fn dispatch(envelope: &ServerEnvelope) -> Vec<Event> {
        let recorder = Recorder::default();
        let payload = serde_json::to_vec(envelope).unwrap();
        decode("Agent1", &payload, &recorder).unwrap();
        recorder.events.into_inner()
    }

    #[test]
    fn test_decode_oef_error() {
        let events = dispatch(&ServerEnvelope::OefError {
            answer_id: 3,
            operation: OefOperation::RegisterService,
        });
        assert_eq!(
            events,
            vec![Event::OefError(3, OefOperation::RegisterService)]
        );
    }

    #[test]
    fn test_decode_dialogue_error() {
        let events = dispatch(&ServerEnvelope::DialogueError {
            answer_id: 1,
            dialogue_id: 9,
            origin: "Agent1".to_string(),
        });
        assert_eq!(events, vec![Event::DialogueError(1, 9, "Agent1".to_string())]);
    }

    #[test]
    fn test_decode_search_result() {
        let events = dispatch(&ServerEnvelope::Agents {
            answer_id: 2,
            agents: vec!["Agent2".to_string(), "Agent3".to_string()],
        });
        assert_eq!(
            events,
            vec![Event::SearchResult(
                2,
                vec!["Agent2".to_string(), "Agent3".to_string()],
            )]
        );
    }

    #[test]
    fn test_decode_message() {
        let events = dispatch(&ServerEnvelope::Content {
            answer_id: 1,
            dialogue_id: 1,
            origin: "Agent1".to_string(),
            payload: MessagePayload::Bytes(b"Hello world".to_vec()),
        });
        assert_eq!(
            events,
            vec![Event::Message(
                1,
                1,
                "Agent1".to_string(),
                b"Hello world".to_vec(),
            )]
        );
    }

    #[test]
    fn test_decode_fipa_quartet() {
        let quartet = [
            (
                FipaBody::Cfp(CfpPayload::Nothing),
                Event::Cfp(1, 4, "Agent1".to_string(), 0, CfpPayload::Nothing),
            ),
            (
                FipaBody::Propose(ProposePayload::Bytes(b"message".to_vec())),
                Event::Propose(
                    1,
                    4,
                    "Agent1".to_string(),
                    0,
                    ProposePayload::Bytes(b"message".to_vec()),
                ),
            ),
            (
                FipaBody::Accept,
                Event::Accept(1, 4, "Agent1".to_string(), 0),
            ),
            (
                FipaBody::Decline,
                Event::Decline(1, 4, "Agent1".to_string(), 0),
            ),
        ];
        for (body, expected) in quartet {
            let events = dispatch(&ServerEnvelope::Content {
                answer_id: 1,
                dialogue_id: 4,
                origin: "Agent1".to_string(),
                payload: MessagePayload::Fipa(FipaMessage { target: 0, body }),
            });
            assert_eq!(events, vec![expected]);
        }
    }

    #[test]
    fn test_undecodable_payload_leaves_agent_untouched() {
        let recorder = Recorder::default();
        let result = decode("Agent1", b"garbage", &recorder);
        assert!(matches!(result, Err(OefError::Serialization(_))));
        assert!(recorder.events.lock().is_empty());
    }
}
