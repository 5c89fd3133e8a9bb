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

//! Wire protocol: length-prefixed framing plus the tagged envelope records.

pub use envelope::{
    expected_answer, AgentAnswer, AgentIdentity, CfpPayload, ClientEnvelope, FipaBody, FipaMessage,
    MessagePayload, OefOperation, ProposePayload, ServerConnected, ServerEnvelope, ServerPhrase,
    AGENTS_PORT,
};
pub use framing::{
    read_frame, read_message, write_frame, write_message, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE,
};

/// Wire envelopes and handshake records.
mod envelope;

/// Length-prefixed binary framing.
mod framing;
