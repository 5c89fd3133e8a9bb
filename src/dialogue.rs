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

//! Dialogue registry: numbered conversations between two agents.
//!
//! A [`Dialogues`] registry owns the per-agent table of open dialogues, each
//! identified by a 32-bit uuid and carrying its own monotonically increasing
//! message id plus application-defined state. Initiators [`create`] a
//! dialogue with a fresh random uuid; responders [`get_or_create`] one keyed
//! on the (uuid, peer) pair of an incoming message.
//!
//! [`create`]: Dialogues::create
//! [`get_or_create`]: Dialogues::get_or_create

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::trace;

use crate::error::OefError;

#[derive(Debug)]
struct DialogueState<T> {
    uuid: u32,
    dest: String,
    msg_id: AtomicU32,
    state: Mutex<T>,
}

/// A handle to one open dialogue.
///
/// The registry owns the dialogue; the handle holds the registry only to be
/// able to remove itself on [`set_finished`](Self::set_finished).
#[derive(Debug)]
pub struct Dialogue<T> {
    state: Arc<DialogueState<T>>,
    registry: Dialogues<T>,
}

impl<T> Clone for Dialogue<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T> Dialogue<T> {
    /// The dialogue uuid.
    #[must_use]
    pub fn uuid(&self) -> u32 {
        self.state.uuid
    }

    /// Public key of the dialogue peer.
    #[must_use]
    pub fn dest(&self) -> &str {
        &self.state.dest
    }

    /// Current message id.
    #[must_use]
    pub fn msg_id(&self) -> u32 {
        self.state.msg_id.load(Ordering::SeqCst)
    }

    /// Advances the message id and returns the previous value.
    pub fn increment_msg_id(&self) -> u32 {
        self.state.msg_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Removes the dialogue from its registry.
    pub fn set_finished(&self) {
        self.registry.erase(self.state.uuid);
    }
}

impl<T: Clone> Dialogue<T> {
    /// A copy of the application state.
    #[must_use]
    pub fn state(&self) -> T {
        self.state.state.lock().clone()
    }

    /// Replaces the application state.
    pub fn set_state(&self, value: T) {
        *self.state.state.lock() = value;
    }
}

/// Per-agent table of open dialogues.
///
/// Cloning is cheap and yields a handle to the same table; all operations
/// serialise on the internal lock.
#[derive(Debug)]
pub struct Dialogues<T> {
    inner: Arc<Mutex<HashMap<u32, Arc<DialogueState<T>>>>>,
}

impl<T> Clone for Dialogues<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Dialogues<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dialogues<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of open dialogues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no dialogue is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Looks up a dialogue by uuid.
    ///
    /// # Errors
    ///
    /// Returns [`OefError::UnknownDialogue`] when no dialogue is registered
    /// under `uuid`.
    pub fn get(&self, uuid: u32) -> Result<Dialogue<T>, OefError> {
        let inner = self.inner.lock();
        inner
            .get(&uuid)
            .map(|state| Dialogue {
                state: state.clone(),
                registry: self.clone(),
            })
            .ok_or(OefError::UnknownDialogue(uuid))
    }

    /// Removes the dialogue registered under `uuid`, if any.
    pub fn erase(&self, uuid: u32) {
        self.inner.lock().remove(&uuid);
    }
}

impl<T: Default> Dialogues<T> {
    /// Starts a dialogue with `dest` under a fresh random uuid.
    pub fn create(&self, dest: impl Into<String>) -> Dialogue<T> {
        let dest = dest.into();
        let mut inner = self.inner.lock();
        let mut rng = rand::thread_rng();
        let uuid = loop {
            let candidate: u32 = rng.gen();
            if !inner.contains_key(&candidate) {
                break candidate;
            }
        };
        let state = Arc::new(DialogueState {
            uuid,
            dest: dest.clone(),
            msg_id: AtomicU32::new(0),
            state: Mutex::new(T::default()),
        });
        inner.insert(uuid, state.clone());
        trace!(dest = %dest, uuid, size = inner.len(), "dialogue created");
        Dialogue {
            state,
            registry: self.clone(),
        }
    }

    /// Returns the dialogue registered under `uuid`, creating it for peer
    /// `dest` when absent.
    pub fn get_or_create(&self, uuid: u32, dest: impl Into<String>) -> Dialogue<T> {
        let mut inner = self.inner.lock();
        let state = inner
            .entry(uuid)
            .or_insert_with(|| {
                Arc::new(DialogueState {
                    uuid,
                    dest: dest.into(),
                    msg_id: AtomicU32::new(0),
                    state: Mutex::new(T::default()),
                })
            })
            .clone();
        trace!(uuid, size = inner.len(), "dialogue resolved");
        Dialogue {
            state,
            registry: self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_starts_at_zero() {
        let dialogues: Dialogues<()> = Dialogues::new();
        let dialogue = dialogues.create("peer");
        assert_eq!(dialogue.msg_id(), 0);
        assert_eq!(dialogue.dest(), "peer");
        assert_eq!(dialogues.len(), 1);
    }

    #[test]
    fn test_create_yields_fresh_uuids() {
        let dialogues: Dialogues<()> = Dialogues::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(dialogues.create("peer").uuid()));
        }
        assert_eq!(dialogues.len(), 64);
    }

    #[test]
    fn test_msg_id_is_monotonic() {
        let dialogues: Dialogues<()> = Dialogues::new();
        let dialogue = dialogues.create("peer");
        assert_eq!(dialogue.increment_msg_id(), 0);
        assert_eq!(dialogue.increment_msg_id(), 1);
        assert_eq!(dialogue.msg_id(), 2);
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let dialogues: Dialogues<u32> = Dialogues::new();
        let first = dialogues.get_or_create(7, "Agent2");
        first.set_state(41);
        let second = dialogues.get_or_create(7, "Agent3");
        // The existing entry wins; the second dest is ignored.
        assert_eq!(second.dest(), "Agent2");
        assert_eq!(second.state(), 41);
        assert_eq!(dialogues.len(), 1);
    }

    #[test]
    fn test_get_unknown_dialogue() {
        let dialogues: Dialogues<()> = Dialogues::new();
        let err = dialogues.get(12).unwrap_err();
        assert!(matches!(err, OefError::UnknownDialogue(12)));
    }

    #[test]
    fn test_set_finished_erases() {
        let dialogues: Dialogues<()> = Dialogues::new();
        let dialogue = dialogues.create("peer");
        let uuid = dialogue.uuid();
        assert!(dialogues.get(uuid).is_ok());
        dialogue.set_finished();
        assert!(matches!(
            dialogues.get(uuid),
            Err(OefError::UnknownDialogue(_))
        ));
        assert!(dialogues.is_empty());
    }

    #[test]
    fn test_state_round_trip() {
        let dialogues: Dialogues<String> = Dialogues::new();
        let dialogue = dialogues.create("peer");
        assert_eq!(dialogue.state(), String::new());
        dialogue.set_state("negotiating".to_string());
        assert_eq!(dialogue.state(), "negotiating");
    }
}
