//! Owns every remote session and fans outbound state out to them

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{EndpointId, InboundUpdate, RemoteEndpoint, RemoteSession, SessionSettings, SessionState};
use crate::shutdown::ShutdownSignal;
use crate::status::LinkActivity;
use crate::tally::WireSnapshot;

/// Inbound updates queued between sessions and the mediator
const INBOUND_CAPACITY: usize = 256;

/// Publishes the latest outbound image to every session
///
/// Last write wins: a session that is not streaming only ever sees the newest
/// image once it reaches Streaming, never a backlog.
#[derive(Clone)]
pub struct Broadcaster {
    tx: Arc<watch::Sender<Option<WireSnapshot>>>,
}

impl Broadcaster {
    pub fn broadcast(&self, snapshot: WireSnapshot) {
        self.tx.send_replace(Some(snapshot));
    }

    pub fn latest(&self) -> Option<WireSnapshot> {
        *self.tx.borrow()
    }
}

struct SessionEntry {
    id: EndpointId,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

pub struct SessionPool {
    broadcaster: Broadcaster,
    sessions: Vec<SessionEntry>,
    activity: Arc<LinkActivity>,
}

impl SessionPool {
    /// Spawn one session per endpoint
    ///
    /// Returns the pool and the merged stream of accepted inbound frames.
    pub fn start(
        endpoints: Vec<RemoteEndpoint>,
        settings: SessionSettings,
        shutdown: ShutdownSignal,
    ) -> (Self, mpsc::Receiver<InboundUpdate>) {
        let (outbound_tx, _) = watch::channel(None);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let activity = Arc::new(LinkActivity::default());

        let sessions = endpoints
            .into_iter()
            .enumerate()
            .map(|(index, endpoint)| {
                let id = EndpointId {
                    index,
                    label: endpoint.label().into(),
                };
                let session = RemoteSession::new(
                    id.clone(),
                    endpoint,
                    settings.clone(),
                    outbound_tx.subscribe(),
                    inbound_tx.clone(),
                    Arc::clone(&activity),
                    shutdown.clone(),
                );
                let state = session.state();
                let task = tokio::spawn(session.run());
                SessionEntry { id, state, task }
            })
            .collect::<Vec<_>>();

        info!("Started {} remote tally session(s)", sessions.len());

        let pool = Self {
            broadcaster: Broadcaster {
                tx: Arc::new(outbound_tx),
            },
            sessions,
            activity,
        };
        (pool, inbound_rx)
    }

    /// Queue `snapshot` for every streaming session
    pub fn broadcast(&self, snapshot: WireSnapshot) {
        self.broadcaster.broadcast(snapshot);
    }

    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Current state of every session, in configuration order
    pub fn session_states(&self) -> Vec<(EndpointId, SessionState)> {
        self.sessions
            .iter()
            .map(|s| (s.id.clone(), *s.state.borrow()))
            .collect()
    }

    /// Watch one session's state
    pub fn state_receiver(&self, index: usize) -> Option<watch::Receiver<SessionState>> {
        self.sessions.get(index).map(|s| s.state.clone())
    }

    pub fn activity(&self) -> Arc<LinkActivity> {
        Arc::clone(&self.activity)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Wait for every session task to finish
    ///
    /// Sessions only exit on the shutdown signal, so trigger it first.
    /// A session that overruns `grace` is aborted.
    pub async fn shutdown(self, grace: Duration) {
        for entry in self.sessions {
            let mut task = entry.task;
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(endpoint = %entry.id, "Session task failed: {}", e),
                Err(_) => {
                    warn!(endpoint = %entry.id, "Session did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        info!("Remote tally sessions stopped");
    }
}
