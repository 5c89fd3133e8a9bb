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

//! Framed-TCP transport: handshake, write queue, and receive loop.
//!
//! The handshake runs as sequential awaits — connect, send identity, answer
//! the challenge, read the verdict — under one configurable deadline, so an
//! unresponsive broker fails the handshake instead of blocking the caller
//! forever. After a successful handshake the socket splits: a single writer
//! task drains the outbound queue (user sends from any task never interleave
//! frame bytes), and `bind` arms a read loop that feeds each inbound frame
//! to the decoder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::agent::{AgentHandler, OefProxy};
use crate::config::OefConfig;
use crate::decoder;
use crate::error::OefError;
use crate::protocol::{
    expected_answer, read_frame, read_message, write_frame, write_message, AgentAnswer,
    AgentIdentity, CfpPayload, ClientEnvelope, FipaBody, FipaMessage, MessagePayload,
    ProposePayload, ServerConnected, ServerPhrase,
};
use crate::schema::{Instance, QueryModel};

/// Adapter from agent operations to framed TCP I/O against a broker.
pub struct NetworkProxy {
    public_key: String,
    max_frame_size: usize,
    handshake_timeout: Duration,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    outgoing_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    stream: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    cancel: CancellationToken,
}

impl NetworkProxy {
    /// Opens a TCP connection to the broker. The session is not usable until
    /// [`handshake`](OefProxy::handshake) has succeeded.
    ///
    /// # Errors
    ///
    /// [`OefError::Io`] when the connection cannot be established.
    pub async fn connect(
        public_key: impl Into<String>,
        host: &str,
        port: u16,
        config: &OefConfig,
    ) -> Result<Self, OefError> {
        let public_key = public_key.into();
        trace!(public_key = %public_key, host, port, "connecting");
        let stream = TcpStream::connect((host, port)).await?;
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.limits.session_buffer);
        Ok(Self {
            public_key,
            max_frame_size: config.limits.max_frame_size,
            handshake_timeout: config.handshake_timeout(),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            stream: Mutex::new(Some(stream)),
            reader: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// The four-step exchange: identity out, phrase in, reversed phrase out,
    /// verdict in.
    async fn run_handshake(&self, stream: &mut TcpStream) -> Result<bool, OefError> {
        write_message(
            stream,
            &AgentIdentity {
                public_key: self.public_key.clone(),
            },
        )
        .await?;
        trace!(public_key = %self.public_key, "identity sent");

        let phrase: ServerPhrase = read_message(stream, self.max_frame_size).await?;
        if phrase.failure {
            info!(public_key = %self.public_key, "broker refused the session");
            return Ok(false);
        }
        trace!(public_key = %self.public_key, "phrase received");

        write_message(
            stream,
            &AgentAnswer {
                answer: expected_answer(&phrase.phrase),
            },
        )
        .await?;

        let connected: ServerConnected = read_message(stream, self.max_frame_size).await?;
        info!(public_key = %self.public_key, status = connected.status, "handshake finished");
        Ok(connected.status)
    }

    fn spawn_writer(&self, mut writer: OwnedWriteHalf) {
        let Some(mut outgoing_rx) = self.outgoing_rx.lock().take() else {
            error!(public_key = %self.public_key, "writer already armed");
            return;
        };
        let cancel = self.cancel.clone();
        let public_key = self.public_key.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    maybe_frame = outgoing_rx.recv() => match maybe_frame {
                        Some(frame) => {
                            if let Err(e) = write_frame(&mut writer, &frame).await {
                                error!(public_key = %public_key, error = %e, "write failed");
                                cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            debug!(public_key = %public_key, "writer task finished");
        });
    }

    async fn send_envelope(&self, envelope: &ClientEnvelope) -> Result<(), OefError> {
        let frame = serde_json::to_vec(envelope)?;
        self.outgoing_tx
            .send(frame)
            .await
            .map_err(|_| OefError::ConnectionClosed)
    }
}

#[async_trait]
impl OefProxy for NetworkProxy {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn handshake(&self) -> bool {
        let Some(mut stream) = self.stream.lock().take() else {
            error!(public_key = %self.public_key, "handshake without an open connection");
            return false;
        };
        match timeout(self.handshake_timeout, self.run_handshake(&mut stream)).await {
            Ok(Ok(true)) => {
                let (read_half, write_half) = stream.into_split();
                *self.reader.lock() = Some(read_half);
                self.spawn_writer(write_half);
                true
            }
            Ok(Ok(false)) => false,
            Ok(Err(e)) => {
                warn!(public_key = %self.public_key, error = %e, "handshake failed");
                false
            }
            Err(_) => {
                warn!(
                    public_key = %self.public_key,
                    timeout_ms = self.handshake_timeout.as_millis(),
                    "handshake timed out"
                );
                false
            }
        }
    }

    fn bind(&self, agent: Arc<dyn AgentHandler>) {
        let Some(mut reader) = self.reader.lock().take() else {
            error!(public_key = %self.public_key, "bind before a successful handshake");
            return;
        };
        let cancel = self.cancel.clone();
        let public_key = self.public_key.clone();
        let max_frame_size = self.max_frame_size;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    frame = read_frame(&mut reader, max_frame_size) => match frame {
                        Ok(payload) => {
                            if let Err(e) = decoder::decode(&public_key, &payload, agent.as_ref()) {
                                warn!(public_key = %public_key, error = %e, "dropping undecodable frame");
                            }
                        }
                        Err(OefError::ConnectionClosed) => {
                            debug!(public_key = %public_key, "broker closed the connection");
                            break;
                        }
                        Err(e) => {
                            error!(public_key = %public_key, error = %e, "receive loop failure");
                            break;
                        }
                    }
                }
            }
            debug!(public_key = %public_key, "receive loop finished");
        });
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.stream.lock().take();
        self.reader.lock().take();
    }

    async fn register_description(
        &self,
        msg_id: u32,
        description: Instance,
    ) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::RegisterDescription {
            msg_id,
            description,
        })
        .await
    }

    async fn unregister_description(&self, msg_id: u32) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::UnregisterDescription { msg_id })
            .await
    }

    async fn register_service(&self, msg_id: u32, service: Instance) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::RegisterService { msg_id, service })
            .await
    }

    async fn unregister_service(&self, msg_id: u32, service: Instance) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::UnregisterService { msg_id, service })
            .await
    }

    async fn search_agents(&self, search_id: u32, query: QueryModel) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::SearchAgents { search_id, query })
            .await
    }

    async fn search_services(&self, search_id: u32, query: QueryModel) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::SearchServices { search_id, query })
            .await
    }

    async fn send_message(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        content: Vec<u8>,
    ) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::SendMessage {
            msg_id,
            dialogue_id,
            destination: dest.to_string(),
            payload: MessagePayload::Bytes(content),
        })
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
        self.send_envelope(&ClientEnvelope::SendMessage {
            msg_id,
            dialogue_id,
            destination: dest.to_string(),
            payload: MessagePayload::Fipa(FipaMessage {
                target,
                body: FipaBody::Cfp(constraints),
            }),
        })
        .await
    }

    async fn send_propose(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
        proposals: ProposePayload,
    ) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::SendMessage {
            msg_id,
            dialogue_id,
            destination: dest.to_string(),
            payload: MessagePayload::Fipa(FipaMessage {
                target,
                body: FipaBody::Propose(proposals),
            }),
        })
        .await
    }

    async fn send_accept(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::SendMessage {
            msg_id,
            dialogue_id,
            destination: dest.to_string(),
            payload: MessagePayload::Fipa(FipaMessage {
                target,
                body: FipaBody::Accept,
            }),
        })
        .await
    }

    async fn send_decline(
        &self,
        msg_id: u32,
        dialogue_id: u32,
        dest: &str,
        target: u32,
    ) -> Result<(), OefError> {
        self.send_envelope(&ClientEnvelope::SendMessage {
            msg_id,
            dialogue_id,
            destination: dest.to_string(),
            payload: MessagePayload::Fipa(FipaMessage {
                target,
                body: FipaBody::Decline,
            }),
        })
        .await
    }
}
