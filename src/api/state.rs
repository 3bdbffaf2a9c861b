use std::collections::HashMap;

use crate::ai::chat::{Transcript, Turn};
use crate::core::AppConfig;
use crate::gemini::SharedCompletionClient;

/// One conversation. A new `epoch` is assigned every time the session
/// is created so an answer started before a reset can be told apart
/// from one started after it.
#[derive(Debug)]
pub struct Session {
    pub transcript: Transcript,
    pub epoch: u64,
    // Set while a question is being answered
    pub pending: bool,
}

pub struct AppState {
    // Sessions keyed by session ID. Only lives as long as the
    // process.
    pub sessions: HashMap<String, Session>,
    pub client: SharedCompletionClient,
    pub config: AppConfig,
    next_epoch: u64,
}

impl AppState {
    pub fn new(client: SharedCompletionClient, config: AppConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            client,
            config,
            next_epoch: 0,
        }
    }

    /// Mark the session as answering a question, creating it if it
    /// doesn't exist yet. Returns the epoch the answer belongs to or
    /// `None` when the session is already answering another question.
    pub fn begin_turn(&mut self, session_id: &str) -> Option<u64> {
        if let Some(session) = self.sessions.get_mut(session_id) {
            if session.pending {
                return None;
            }
            session.pending = true;
            return Some(session.epoch);
        }

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.sessions.insert(
            session_id.to_string(),
            Session {
                transcript: Transcript::new(),
                epoch,
                pending: true,
            },
        );
        Some(epoch)
    }

    /// Settle the question started with `begin_turn`. The turn is only
    /// appended if the session wasn't ended in the meantime. A session
    /// left without any turns is removed. Returns whether the turn was
    /// recorded.
    pub fn finish_turn(&mut self, session_id: &str, epoch: u64, turn: Option<Turn>) -> bool {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if session.epoch != epoch {
            return false;
        }

        session.pending = false;
        match turn {
            Some(turn) => {
                session.transcript.append(turn);
                true
            }
            None => {
                if session.transcript.is_empty() {
                    self.sessions.remove(session_id);
                }
                false
            }
        }
    }

    /// Forget the session and everything said in it. Answers still in
    /// flight for it are discarded when they finish.
    pub fn end_session(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }
}
