//! Single-owner async front end for a [`Session`]
//!
//! A session is mutated through `&mut self`, so sharing one between tasks means
//! funnelling requests through its owner. [`spawn_session`] moves the session
//! onto a tokio task; cloned [`SessionHandle`]s send commands over an mpsc
//! channel and await oneshot replies. Requests are served strictly in arrival
//! order, one at a time.

use crate::error::{TallyError, TallyResult};
use crate::query::Row;
use crate::session::{Session, SessionStats};
use crate::types::{Fact, FactHandle};
use std::time::Duration;
use tally_types::FactValue;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Pending requests a handle may queue before senders wait
const COMMAND_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<TallyResult<T>>;

#[derive(Debug)]
enum Command {
    Insert { fact: Fact, reply: Reply<FactHandle> },
    Update { handle: FactHandle, fact: Fact, reply: Reply<()> },
    Retract { handle: FactHandle, reply: Reply<Fact> },
    Get { handle: FactHandle, reply: Reply<Option<Fact>> },
    FireAll { limit: Option<usize>, reply: Reply<usize> },
    SetFocus { group: String, reply: Reply<()> },
    PopFocus { reply: Reply<Option<String>> },
    Query { name: String, params: Vec<FactValue>, reply: Reply<Vec<Row>> },
    AdvanceTime { by: Duration, reply: Reply<i64> },
    Stats { reply: Reply<SessionStats> },
}

/// Cloneable async handle to a session running on its own task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
}

/// Move `session` onto a tokio task; the task ends when every handle is dropped
pub fn spawn_session(session: Session) -> (SessionHandle, JoinHandle<Session>) {
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run(session, receiver));
    (SessionHandle { sender }, task)
}

async fn run(mut session: Session, mut receiver: mpsc::Receiver<Command>) -> Session {
    info!(session = %session.id(), "Session actor started");
    while let Some(command) = receiver.recv().await {
        debug!(?command, "Session command");
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::Insert { fact, reply } => {
                let _ = reply.send(session.insert(fact));
            }
            Command::Update { handle, fact, reply } => {
                let _ = reply.send(session.update(handle, fact));
            }
            Command::Retract { handle, reply } => {
                let _ = reply.send(session.retract(handle));
            }
            Command::Get { handle, reply } => {
                let _ = reply.send(Ok(session.get_object(handle).cloned()));
            }
            Command::FireAll { limit, reply } => {
                let _ = reply.send(session.fire_all(limit));
            }
            Command::SetFocus { group, reply } => {
                session.set_focus(&group);
                let _ = reply.send(Ok(()));
            }
            Command::PopFocus { reply } => {
                let _ = reply.send(Ok(session.pop_focus()));
            }
            Command::Query { name, params, reply } => {
                let rows = session.query(&name, &params).map(|results| results.to_vec());
                let _ = reply.send(rows);
            }
            Command::AdvanceTime { by, reply } => {
                let _ = reply.send(session.advance_time(by));
            }
            Command::Stats { reply } => {
                let _ = reply.send(Ok(session.stats()));
            }
        }
    }
    info!(session = %session.id(), "Session actor stopped");
    session
}

impl SessionHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> TallyResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender.send(command(reply)).await.map_err(|_| TallyError::SessionClosed)?;
        response.await.map_err(|_| TallyError::SessionClosed)?
    }

    pub async fn insert(&self, fact: Fact) -> TallyResult<FactHandle> {
        self.request(|reply| Command::Insert { fact, reply }).await
    }

    pub async fn update(&self, handle: FactHandle, fact: Fact) -> TallyResult<()> {
        self.request(|reply| Command::Update { handle, fact, reply }).await
    }

    pub async fn retract(&self, handle: FactHandle) -> TallyResult<Fact> {
        self.request(|reply| Command::Retract { handle, reply }).await
    }

    pub async fn get_object(&self, handle: FactHandle) -> TallyResult<Option<Fact>> {
        self.request(|reply| Command::Get { handle, reply }).await
    }

    pub async fn fire_all(&self, limit: Option<usize>) -> TallyResult<usize> {
        self.request(|reply| Command::FireAll { limit, reply }).await
    }

    pub async fn set_focus(&self, group: impl Into<String>) -> TallyResult<()> {
        let group = group.into();
        self.request(|reply| Command::SetFocus { group, reply }).await
    }

    pub async fn pop_focus(&self) -> TallyResult<Option<String>> {
        self.request(|reply| Command::PopFocus { reply }).await
    }

    /// Run a query and collect its rows
    pub async fn query(&self, name: impl Into<String>, params: Vec<FactValue>) -> TallyResult<Vec<Row>> {
        let name = name.into();
        self.request(|reply| Command::Query { name, params, reply }).await
    }

    pub async fn advance_time(&self, by: Duration) -> TallyResult<i64> {
        self.request(|reply| Command::AdvanceTime { by, reply }).await
    }

    pub async fn stats(&self) -> TallyResult<SessionStats> {
        self.request(|reply| Command::Stats { reply }).await
    }
}
