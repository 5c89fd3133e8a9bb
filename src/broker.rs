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

//! TCP broker: accepts agent sessions and feeds the scheduler.
//!
//! The listener accepts connections, runs the server side of the
//! challenge/response handshake, and then translates each inbound client
//! envelope into scheduler operations. Outbound traffic for a session flows
//! through its own write queue drained by one writer task, so search answers
//! and peer messages never interleave on the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::OefConfig;
use crate::error::OefError;
use crate::protocol::{
    expected_answer, read_frame, read_message, write_message, AgentAnswer, AgentIdentity,
    ClientEnvelope, OefOperation, ServerConnected, ServerEnvelope, ServerPhrase,
};
use crate::scheduler::Scheduler;

/// Length of the generated challenge phrase.
const PHRASE_LENGTH: usize = 16;

/// Statistics for the broker listener.
#[derive(Debug, Default)]
pub struct BrokerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicUsize,
    /// Currently active sessions.
    pub connections_active: AtomicUsize,
    /// Handshakes that did not reach the connected state.
    pub handshake_failures: AtomicUsize,
    /// Total frames received from agents.
    pub frames_received: AtomicUsize,
    /// Total errors encountered.
    pub errors: AtomicUsize,
}

impl BrokerStats {
    /// Get the number of connections accepted.
    #[must_use]
    pub fn connections_accepted(&self) -> usize {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Get the number of active sessions.
    #[must_use]
    pub fn connections_active(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Get the number of failed handshakes.
    #[must_use]
    pub fn handshake_failures(&self) -> usize {
        self.handshake_failures.load(Ordering::Relaxed)
    }

    /// Get the number of frames received.
    #[must_use]
    pub fn frames_received(&self) -> usize {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Get the number of errors.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Shared context for session handling.
#[derive(Clone)]
struct SessionContext {
    scheduler: Arc<Scheduler>,
    stats: Arc<BrokerStats>,
    cancel_token: CancellationToken,
    connection_semaphore: Arc<Semaphore>,
    max_frame_size: usize,
    session_buffer: usize,
    handshake_timeout: Duration,
}

/// Handle for managing a running broker.
pub struct BrokerHandle {
    local_addr: SocketAddr,
    scheduler: Arc<Scheduler>,
    /// Statistics for the listener.
    pub stats: Arc<BrokerStats>,
    cancel_token: CancellationToken,
}

impl BrokerHandle {
    /// The address the broker is listening on. With port 0 in the
    /// configuration this carries the ephemeral port that was bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The scheduler backing this broker.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Stops accepting connections and tears down active sessions.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the broker has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Stops the listener and joins the scheduler worker.
    pub async fn shutdown(&self) {
        self.stop();
        self.scheduler.stop().await;
    }
}

/// Run the broker listener.
///
/// Binds the configured address, spawns the accept loop, and returns a
/// handle for lifecycle management. The scheduler is created here and owns
/// the session table; use [`BrokerHandle::scheduler`] to share it with
/// in-process agents.
///
/// # Errors
///
/// [`OefError::Io`] when the listening socket cannot be bound.
pub async fn run(config: OefConfig) -> Result<BrokerHandle, OefError> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "broker listening");

    let scheduler = Arc::new(Scheduler::new(config.limits.queue_capacity));
    let stats = Arc::new(BrokerStats::default());
    let cancel_token = CancellationToken::new();

    let context = SessionContext {
        scheduler: scheduler.clone(),
        stats: stats.clone(),
        cancel_token: cancel_token.clone(),
        connection_semaphore: Arc::new(Semaphore::new(config.limits.max_connections)),
        max_frame_size: config.limits.max_frame_size,
        session_buffer: config.limits.session_buffer,
        handshake_timeout: config.handshake_timeout(),
    };

    tokio::spawn(async move {
        accept_loop(listener, context).await;
        info!("broker listener shut down");
    });

    Ok(BrokerHandle {
        local_addr,
        scheduler,
        stats,
        cancel_token,
    })
}

/// Main accept loop for the listener.
async fn accept_loop(listener: TcpListener, ctx: SessionContext) {
    loop {
        tokio::select! {
            biased;

            () = ctx.cancel_token.cancelled() => {
                info!("broker received shutdown signal");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        let Ok(permit) = ctx.connection_semaphore.clone().try_acquire_owned() else {
                            warn!(%peer_addr, "maximum concurrent sessions reached, rejecting connection");
                            ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };

                        ctx.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                        let conn_id = ctx.stats.connections_accepted.load(Ordering::Relaxed);
                        trace!(conn_id, %peer_addr, "accepted connection");

                        let ctx_clone = ctx.clone();
                        tokio::spawn(async move {
                            handle_session(stream, conn_id, ctx_clone).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

/// Server side of the challenge/response handshake.
///
/// Reads the agent identity, challenges it with a random phrase, verifies
/// the byte-reversed answer, and atomically claims the session key. The
/// phrase reversal stands in for a signed nonce exchange.
async fn server_handshake(
    stream: &mut TcpStream,
    ctx: &SessionContext,
) -> Result<String, OefError> {
    let identity: AgentIdentity = read_message(stream, ctx.max_frame_size).await?;
    let public_key = identity.public_key;

    if public_key.is_empty() || ctx.scheduler.has_session(&public_key) {
        write_message(
            stream,
            &ServerPhrase {
                phrase: String::new(),
                failure: true,
            },
        )
        .await?;
        if public_key.is_empty() {
            return Err(OefError::Protocol("empty public key".to_string()));
        }
        return Err(OefError::DuplicateSession(public_key));
    }

    let phrase: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PHRASE_LENGTH)
        .map(char::from)
        .collect();
    write_message(
        stream,
        &ServerPhrase {
            phrase: phrase.clone(),
            failure: false,
        },
    )
    .await?;

    let answer: AgentAnswer = read_message(stream, ctx.max_frame_size).await?;
    if answer.answer != expected_answer(&phrase) {
        write_message(stream, &ServerConnected { status: false }).await?;
        return Err(OefError::HandshakeFailed);
    }

    // The atomic claim decides races between two sessions using one key.
    if !ctx.scheduler.connect(&public_key) {
        write_message(stream, &ServerConnected { status: false }).await?;
        return Err(OefError::DuplicateSession(public_key));
    }
    write_message(stream, &ServerConnected { status: true }).await?;
    Ok(public_key)
}

/// Handle one agent session from handshake to disconnect.
async fn handle_session(mut stream: TcpStream, conn_id: usize, ctx: SessionContext) {
    let public_key = match timeout(ctx.handshake_timeout, server_handshake(&mut stream, &ctx)).await
    {
        Ok(Ok(public_key)) => public_key,
        Ok(Err(e)) => {
            ctx.stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
            debug!(conn_id, error = %e, "handshake rejected");
            return;
        }
        Err(_) => {
            ctx.stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
            warn!(conn_id, "handshake timed out");
            return;
        }
    };

    ctx.stats.connections_active.fetch_add(1, Ordering::Relaxed);
    info!(conn_id, public_key = %public_key, "session established");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(ctx.session_buffer);
    if let Err(e) = ctx.scheduler.bind_channel(&public_key, outbound_tx) {
        error!(conn_id, public_key = %public_key, error = %e, "failed to bind session channel");
        ctx.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let session_cancel = ctx.cancel_token.child_token();

    // Writer task: sole owner of the write half, drains the session queue.
    let writer_cancel = session_cancel.clone();
    let writer_key = public_key.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = writer_cancel.cancelled() => break,

                maybe_frame = outbound_rx.recv() => match maybe_frame {
                    Some(frame) => {
                        if let Err(e) = crate::protocol::write_frame(&mut writer, &frame).await {
                            error!(public_key = %writer_key, error = %e, "session write failed");
                            writer_cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });

    loop {
        tokio::select! {
            biased;

            () = session_cancel.cancelled() => {
                trace!(conn_id, "session received shutdown signal");
                break;
            }

            frame = read_frame(&mut reader, ctx.max_frame_size) => match frame {
                Ok(payload) => {
                    ctx.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = handle_client_frame(&public_key, &payload, &ctx).await {
                        // Malformed frames are dropped; the session survives.
                        warn!(conn_id, public_key = %public_key, error = %e, "dropping malformed frame");
                        ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(OefError::ConnectionClosed) => {
                    debug!(conn_id, public_key = %public_key, "session closed by agent");
                    break;
                }
                Err(e) => {
                    error!(conn_id, public_key = %public_key, error = %e, "session read failed");
                    ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
    }

    ctx.scheduler.disconnect(&public_key);
    session_cancel.cancel();
    let _ = writer_task.await;
    ctx.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
    info!(conn_id, public_key = %public_key, "session finished");
}

/// Sends an operation failure back to the session.
async fn reply_oef_error(
    ctx: &SessionContext,
    public_key: &str,
    answer_id: u32,
    operation: OefOperation,
) {
    let envelope = ServerEnvelope::OefError {
        answer_id,
        operation,
    };
    match serde_json::to_vec(&envelope) {
        Ok(frame) => {
            if let Err(e) = ctx.scheduler.send(public_key, frame).await {
                error!(public_key, error = %e, "failed to queue error reply");
            }
        }
        Err(e) => error!(public_key, error = %e, "failed to encode error reply"),
    }
}

/// Sends a search answer back to the session.
async fn reply_agents(
    ctx: &SessionContext,
    public_key: &str,
    search_id: u32,
    agents: Vec<String>,
) -> Result<(), OefError> {
    let answer = ServerEnvelope::Agents {
        answer_id: search_id,
        agents,
    };
    let frame = serde_json::to_vec(&answer)?;
    ctx.scheduler.send(public_key, frame).await
}

/// Translate one client envelope into scheduler operations.
async fn handle_client_frame(
    public_key: &str,
    payload: &[u8],
    ctx: &SessionContext,
) -> Result<(), OefError> {
    let envelope: ClientEnvelope = serde_json::from_slice(payload)?;
    let operation = envelope.operation();
    trace!(public_key, ?operation, "client frame");

    match envelope {
        ClientEnvelope::RegisterDescription {
            msg_id,
            description,
        } => {
            if let Err(e) = ctx.scheduler.register_description(public_key, description) {
                warn!(public_key, error = %e, "register description failed");
                reply_oef_error(ctx, public_key, msg_id, operation).await;
            }
        }
        ClientEnvelope::UnregisterDescription { msg_id } => {
            if let Err(e) = ctx.scheduler.unregister_description(public_key) {
                warn!(public_key, error = %e, "unregister description failed");
                reply_oef_error(ctx, public_key, msg_id, operation).await;
            }
        }
        ClientEnvelope::RegisterService { msg_id, service } => {
            if let Err(e) = ctx.scheduler.register_service(public_key, &service) {
                warn!(public_key, error = %e, "register service failed");
                reply_oef_error(ctx, public_key, msg_id, operation).await;
            }
        }
        ClientEnvelope::UnregisterService { msg_id, service } => {
            if let Err(e) = ctx.scheduler.unregister_service(public_key, &service) {
                warn!(public_key, error = %e, "unregister service failed");
                reply_oef_error(ctx, public_key, msg_id, operation).await;
            }
        }
        ClientEnvelope::SearchAgents { search_id, query } => {
            let agents = ctx.scheduler.search_agents(search_id, &query);
            reply_agents(ctx, public_key, search_id, agents).await?;
        }
        ClientEnvelope::SearchServices { search_id, query } => {
            let agents = ctx.scheduler.search_services(search_id, &query);
            reply_agents(ctx, public_key, search_id, agents).await?;
        }
        ClientEnvelope::SendMessage {
            msg_id,
            dialogue_id,
            destination,
            payload,
        } => {
            let content = ServerEnvelope::Content {
                answer_id: msg_id,
                dialogue_id,
                origin: public_key.to_string(),
                payload,
            };
            let frame = serde_json::to_vec(&content)?;
            ctx.scheduler
                .send_to(public_key, &destination, msg_id, dialogue_id, frame)
                .await?;
        }
    }
    Ok(())
}
