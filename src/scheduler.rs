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

//! The broker core: session table, service directory, and dispatch worker.
//!
//! A [`Scheduler`] owns every per-agent session, the service directory, and
//! a bounded dispatch queue drained by one dedicated worker task. Frames
//! from any number of producers are enqueued with [`send`](Scheduler::send)
//! or [`send_to`](Scheduler::send_to); the single consumer guarantees that
//! callbacks for one agent are serialised and that frames from one sender to
//! one recipient are delivered in send order.
//!
//! Local sessions sink into a bound [`AgentHandler`]; network sessions sink
//! into their connection's outbound write queue. Frames addressed to a
//! session that has disconnected are dropped when the worker discovers the
//! session is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::agent::AgentHandler;
use crate::decoder;
use crate::directory::ServiceDirectory;
use crate::error::OefError;
use crate::protocol::ServerEnvelope;
use crate::schema::{Instance, QueryModel};

/// Where frames addressed to a session end up.
#[derive(Clone)]
enum SessionSink {
    /// Session exists but has not bound a receiver yet.
    Unbound,
    /// In-process agent: frames are decoded into its callbacks.
    Handler(Arc<dyn AgentHandler>),
    /// Network agent: frames are forwarded to the connection writer.
    Channel(mpsc::Sender<Vec<u8>>),
}

#[derive(Clone)]
struct Session {
    description: Option<Instance>,
    sink: SessionSink,
}

impl Session {
    fn new() -> Self {
        Self {
            description: None,
            sink: SessionSink::Unbound,
        }
    }

    fn matches(&self, query: &QueryModel) -> bool {
        self.description
            .as_ref()
            .is_some_and(|description| query.check(description))
    }
}

struct DispatchItem {
    dest: String,
    frame: Vec<u8>,
}

impl DispatchItem {
    /// The shutdown sentinel: empty key, empty frame.
    fn sentinel() -> Self {
        Self {
            dest: String::new(),
            frame: Vec::new(),
        }
    }
}

/// Session table, service directory, dispatch queue, and worker.
///
/// `stop` must be called to join the worker; dropping the scheduler without
/// stopping closes the queue, which also terminates the worker.
pub struct Scheduler {
    sessions: Arc<DashMap<String, Session>>,
    directory: Mutex<ServiceDirectory>,
    queue_tx: mpsc::Sender<DispatchItem>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl Scheduler {
    /// Creates a scheduler and spawns its dispatch worker.
    ///
    /// `queue_capacity` bounds the dispatch queue; producers wait when it is
    /// full.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        let sessions = Arc::new(DashMap::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(Self::process(
            sessions.clone(),
            stopping.clone(),
            queue_rx,
        ));
        Self {
            sessions,
            directory: Mutex::new(ServiceDirectory::new()),
            queue_tx,
            worker: Mutex::new(Some(worker)),
            stopping,
        }
    }

    /// The dispatch worker: drains the queue and delivers each frame to the
    /// addressed session's sink.
    async fn process(
        sessions: Arc<DashMap<String, Session>>,
        stopping: Arc<AtomicBool>,
        mut queue_rx: mpsc::Receiver<DispatchItem>,
    ) {
        while let Some(item) = queue_rx.recv().await {
            if item.dest.is_empty() {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            // Clone the sink out of the map so no shard lock is held while
            // delivering.
            let sink = sessions.get(&item.dest).map(|session| session.sink.clone());
            match sink {
                Some(SessionSink::Handler(handler)) => {
                    if let Err(e) = decoder::decode(&item.dest, &item.frame, handler.as_ref()) {
                        warn!(dest = %item.dest, error = %e, "dropping undecodable frame");
                    }
                }
                Some(SessionSink::Channel(tx)) => {
                    if tx.send(item.frame).await.is_err() {
                        trace!(dest = %item.dest, "session writer gone, frame dropped");
                    }
                }
                Some(SessionSink::Unbound) => {
                    trace!(dest = %item.dest, "frame for unbound session dropped");
                }
                None => {
                    trace!(dest = %item.dest, "frame for disconnected session dropped");
                }
            }
        }
        debug!("dispatch worker terminated");
    }

    /// Stops the worker: sets the stopping flag, pushes the sentinel to
    /// unblock the queue, and joins.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.queue_tx.send(DispatchItem::sentinel()).await;
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "dispatch worker join failed");
            }
        }
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a session with this key exists.
    #[must_use]
    pub fn has_session(&self, public_key: &str) -> bool {
        self.sessions.contains_key(public_key)
    }

    /// Creates a session for `public_key`.
    ///
    /// Returns `false` when a session with this key already exists; the
    /// check-and-insert is atomic, so exactly one of two racing connects
    /// succeeds.
    pub fn connect(&self, public_key: &str) -> bool {
        trace!(public_key, size = self.sessions.len(), "connect");
        match self.sessions.entry(public_key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Session::new());
                true
            }
        }
    }

    /// Removes the session and its service advertisements. Frames still
    /// queued for this key are dropped at dispatch.
    pub fn disconnect(&self, public_key: &str) {
        trace!(public_key, "disconnect");
        self.sessions.remove(public_key);
        self.directory.lock().unregister_all(public_key);
    }

    /// Binds an in-process callback receiver to the session. Frames received
    /// after the bind are dispatched to it.
    ///
    /// # Errors
    ///
    /// [`OefError::UnknownPeer`] when no session exists for `public_key`.
    pub fn bind_handler(
        &self,
        public_key: &str,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<(), OefError> {
        let mut session = self
            .sessions
            .get_mut(public_key)
            .ok_or_else(|| OefError::UnknownPeer(public_key.to_string()))?;
        session.sink = SessionSink::Handler(handler);
        Ok(())
    }

    /// Binds a network session's outbound write queue. Frames received after
    /// the bind are forwarded to it.
    ///
    /// # Errors
    ///
    /// [`OefError::UnknownPeer`] when no session exists for `public_key`.
    pub fn bind_channel(
        &self,
        public_key: &str,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), OefError> {
        let mut session = self
            .sessions
            .get_mut(public_key)
            .ok_or_else(|| OefError::UnknownPeer(public_key.to_string()))?;
        session.sink = SessionSink::Channel(outbound);
        Ok(())
    }

    /// Sets the description matched by agent searches.
    ///
    /// # Errors
    ///
    /// [`OefError::UnknownPeer`] when no session exists for `public_key`.
    pub fn register_description(
        &self,
        public_key: &str,
        description: Instance,
    ) -> Result<(), OefError> {
        trace!(public_key, "register description");
        let mut session = self
            .sessions
            .get_mut(public_key)
            .ok_or_else(|| OefError::UnknownPeer(public_key.to_string()))?;
        session.description = Some(description);
        Ok(())
    }

    /// Clears the description.
    ///
    /// # Errors
    ///
    /// [`OefError::UnknownPeer`] when no session exists for `public_key`.
    pub fn unregister_description(&self, public_key: &str) -> Result<(), OefError> {
        trace!(public_key, "unregister description");
        let mut session = self
            .sessions
            .get_mut(public_key)
            .ok_or_else(|| OefError::UnknownPeer(public_key.to_string()))?;
        session.description = None;
        Ok(())
    }

    /// Adds a service advertisement to the directory.
    ///
    /// # Errors
    ///
    /// [`OefError::UnknownPeer`] when no session exists for `public_key`.
    pub fn register_service(&self, public_key: &str, service: &Instance) -> Result<(), OefError> {
        trace!(public_key, "register service");
        if !self.sessions.contains_key(public_key) {
            return Err(OefError::UnknownPeer(public_key.to_string()));
        }
        self.directory.lock().register(service, public_key);
        Ok(())
    }

    /// Removes a service advertisement from the directory.
    ///
    /// # Errors
    ///
    /// [`OefError::UnknownPeer`] when no session exists for `public_key`.
    pub fn unregister_service(&self, public_key: &str, service: &Instance) -> Result<(), OefError> {
        trace!(public_key, "unregister service");
        if !self.sessions.contains_key(public_key) {
            return Err(OefError::UnknownPeer(public_key.to_string()));
        }
        self.directory.lock().unregister(service, public_key);
        Ok(())
    }

    /// Keys of sessions whose description matches `query`, in lexicographic
    /// order.
    #[must_use]
    pub fn search_agents(&self, _search_id: u32, query: &QueryModel) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().matches(query))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        trace!(count = keys.len(), "search agents");
        keys
    }

    /// Keys of agents advertising a service matching `query`, in
    /// lexicographic order.
    #[must_use]
    pub fn search_services(&self, _search_id: u32, query: &QueryModel) -> Vec<String> {
        let keys = self.directory.lock().query(query);
        trace!(count = keys.len(), "search services");
        keys
    }

    /// Enqueues a frame to `public_key` itself. Used for search answers and
    /// broker error replies.
    ///
    /// # Errors
    ///
    /// [`OefError::ConnectionClosed`] when the dispatch queue is gone.
    pub async fn send(&self, public_key: &str, frame: Vec<u8>) -> Result<(), OefError> {
        if self.stopping.load(Ordering::SeqCst) {
            trace!(public_key, "scheduler stopping, frame dropped");
            return Ok(());
        }
        self.queue_tx
            .send(DispatchItem {
                dest: public_key.to_string(),
                frame,
            })
            .await
            .map_err(|_| OefError::ConnectionClosed)
    }

    /// Enqueues a frame from `from` to `to`.
    ///
    /// When `to` is not a connected session the frame is not queued; instead
    /// a dialogue error carrying the original `dialogue_id` is sent back to
    /// `from` so the failure is observable.
    ///
    /// # Errors
    ///
    /// [`OefError::ConnectionClosed`] when the dispatch queue is gone.
    pub async fn send_to(
        &self,
        from: &str,
        to: &str,
        answer_id: u32,
        dialogue_id: u32,
        frame: Vec<u8>,
    ) -> Result<(), OefError> {
        trace!(from, to, "send to");
        if self.sessions.contains_key(to) {
            return self.send(to, frame).await;
        }
        warn!(from, to, "destination is not connected");
        let reply = ServerEnvelope::DialogueError {
            answer_id,
            dialogue_id,
            origin: from.to_string(),
        };
        let bytes = serde_json::to_vec(&reply)?;
        self.send(from, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessagePayload;
    use std::time::Duration;

    struct CountingAgent {
        messages: Mutex<Vec<(u32, String, Vec<u8>)>>,
    }

    impl CountingAgent {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
            })
        }
    }

    impl AgentHandler for CountingAgent {
        fn on_message(&self, _answer_id: u32, dialogue_id: u32, origin: &str, content: &[u8]) {
            self.messages
                .lock()
                .push((dialogue_id, origin.to_string(), content.to_vec()));
        }
    }

    fn content_frame(origin: &str, dialogue_id: u32, content: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&ServerEnvelope::Content {
            answer_id: 1,
            dialogue_id,
            origin: origin.to_string(),
            payload: MessagePayload::Bytes(content.to_vec()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_is_exclusive() {
        let scheduler = Scheduler::new(16);
        assert_eq!(scheduler.agent_count(), 0);
        assert!(scheduler.connect("Agent1"));
        assert!(!scheduler.connect("Agent1"));
        assert_eq!(scheduler.agent_count(), 1);
        assert!(scheduler.connect("Agent2"));
        assert_eq!(scheduler.agent_count(), 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_releases_key_and_services() {
        let scheduler = Scheduler::new(16);
        scheduler.connect("Agent1");
        scheduler.disconnect("Agent1");
        assert_eq!(scheduler.agent_count(), 0);
        assert!(scheduler.connect("Agent1"));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_in_send_order() {
        let scheduler = Scheduler::new(16);
        scheduler.connect("Agent2");
        let agent = CountingAgent::new();
        scheduler.bind_handler("Agent2", agent.clone()).unwrap();

        for i in 0..5u8 {
            scheduler
                .send_to("Agent1", "Agent2", 1, 1, content_frame("Agent1", 1, &[i]))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let messages = agent.messages.lock();
        assert_eq!(messages.len(), 5);
        for (i, (dialogue_id, origin, content)) in messages.iter().enumerate() {
            assert_eq!(*dialogue_id, 1);
            assert_eq!(origin, "Agent1");
            assert_eq!(content, &vec![u8::try_from(i).unwrap()]);
        }
        drop(messages);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_replies_dialogue_error() {
        let scheduler = Scheduler::new(16);
        scheduler.connect("Agent1");

        struct ErrorAgent {
            errors: Mutex<Vec<(u32, String)>>,
        }
        impl AgentHandler for ErrorAgent {
            fn on_dialogue_error(&self, _answer_id: u32, dialogue_id: u32, origin: &str) {
                self.errors.lock().push((dialogue_id, origin.to_string()));
            }
        }
        let errors = Arc::new(ErrorAgent {
            errors: Mutex::new(Vec::new()),
        });
        scheduler.bind_handler("Agent1", errors.clone()).unwrap();

        scheduler
            .send_to("Agent1", "Ghost", 1, 9, content_frame("Agent1", 9, b"hi"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            errors.errors.lock().as_slice(),
            &[(9, "Agent1".to_string())]
        );
        assert!(!scheduler.has_session("Ghost"));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_frames_to_disconnected_session_are_dropped() {
        let scheduler = Scheduler::new(16);
        scheduler.connect("Agent1");
        scheduler.connect("Agent2");
        let agent = CountingAgent::new();
        scheduler.bind_handler("Agent2", agent.clone()).unwrap();
        scheduler.disconnect("Agent2");

        scheduler
            .send_to("Agent1", "Agent2", 1, 1, content_frame("Agent1", 1, b"late"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Agent2 was gone before dispatch; the worker dropped the frame and
        // the sender got a dialogue error instead.
        assert!(agent.messages.lock().is_empty());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_terminates_worker_and_silences_callbacks() {
        let scheduler = Scheduler::new(16);
        scheduler.connect("Agent1");
        let agent = CountingAgent::new();
        scheduler.bind_handler("Agent1", agent.clone()).unwrap();

        scheduler.stop().await;

        scheduler
            .send("Agent1", content_frame("Agent2", 1, b"after stop"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(agent.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_register_description_requires_session() {
        let scheduler = Scheduler::new(16);
        let result = scheduler.unregister_description("Agent1");
        assert!(matches!(result, Err(OefError::UnknownPeer(_))));
        scheduler.stop().await;
    }
}
