//! Ordered, non-blocking persistence writes.

use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::PersistenceSink;
use crate::auth::Session;

enum PersistCommand {
    Save(Arc<Session>),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Feeds a dedicated thread that applies session writes to a sink in the
/// order they were queued. Queueing never blocks, from sync or async code.
pub(crate) struct PersistenceWriter {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersistenceWriter {
    pub(crate) fn spawn(sink: Arc<dyn PersistenceSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistCommand>();
        let spawned = thread::Builder::new()
            .name("sessionward-persist".into())
            .spawn(move || {
                // Exits once every sender (the owning store) is gone
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        PersistCommand::Save(session) => match sink.save(&session) {
                            Ok(()) => debug!(generation = session.generation(), "Session persisted"),
                            Err(e) => warn!(error = %e, "Failed to persist session"),
                        },
                        PersistCommand::Clear => {
                            if let Err(e) = sink.clear() {
                                warn!(error = %e, "Failed to clear persisted session");
                            }
                        }
                        PersistCommand::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to start persistence writer; sessions will not be persisted");
        }
        Self { tx }
    }

    pub(crate) fn save(&self, session: Arc<Session>) {
        self.send(PersistCommand::Save(session));
    }

    pub(crate) fn clear(&self) {
        self.send(PersistCommand::Clear);
    }

    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PersistCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn send(&self, command: PersistCommand) {
        if self.tx.send(command).is_err() {
            warn!("Persistence writer stopped; dropping session write");
        }
    }
}
