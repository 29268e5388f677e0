use crate::matching::{self, CandidateFailure, MatchOutcome, MatchStrategy};
use rollcall_core::{
    AnalyzerError, Embedder, FaceAnalyzer, FaceStore, StoreError, StoredFace, StudentId,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("comparison against {student_id} failed: {source}")]
    CandidateFailed {
        student_id: String,
        #[source]
        source: AnalyzerError,
    },
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("face analysis did not finish within {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Engine behaviour fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub strategy: MatchStrategy,
    pub on_failure: CandidateFailure,
    /// Bounded request queue; callers wait for a slot once it is full.
    pub queue: usize,
    /// Upper bound on queueing plus analysis for one request.
    pub timeout: Duration,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        id: StudentId,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<StoredFace, EngineError>>,
    },
    Verify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<MatchOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Register `image` for `id`. The stored image is only replaced once an
    /// embedding has been extracted from the new one.
    pub async fn register(&self, id: StudentId, image: Vec<u8>) -> Result<StoredFace, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Register { id, image, reply }, rx).await
    }

    /// Match `image` against every registered face.
    pub async fn verify(&self, image: Vec<u8>) -> Result<MatchOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Verify { image, reply }, rx).await
    }

    async fn call<T>(
        &self,
        request: EngineRequest,
        rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let exchange = async {
            self.tx.send(request).await.map_err(|_| EngineError::ChannelClosed)?;
            rx.await.map_err(|_| EngineError::ChannelClosed)?
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the analyzer for its whole life; requests are served one
/// at a time in arrival order. The thread exits once every handle is dropped.
pub fn spawn_engine<E>(
    mut analyzer: FaceAnalyzer<E>,
    store: Arc<dyn FaceStore>,
    settings: EngineSettings,
) -> Result<EngineHandle, EngineError>
where
    E: Embedder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(settings.queue.max(1));

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(
                strategy = %settings.strategy,
                on_failure = ?settings.on_failure,
                "engine thread started"
            );
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { id, image, reply } => {
                        // Caller timed out while this sat in the queue.
                        if reply.is_closed() {
                            tracing::debug!(student_id = %id, "register: caller gone, skipping");
                            continue;
                        }
                        let result = run_register(&mut analyzer, store.as_ref(), &id, &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify { image, reply } => {
                        if reply.is_closed() {
                            tracing::debug!("verify: caller gone, skipping");
                            continue;
                        }
                        let result =
                            run_verify(&mut analyzer, store.as_ref(), &settings, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        timeout: settings.timeout,
    })
}

/// Write the upload to scratch, extract an embedding, then install it.
fn run_register<E: Embedder>(
    analyzer: &mut FaceAnalyzer<E>,
    store: &dyn FaceStore,
    id: &StudentId,
    image: &[u8],
) -> Result<StoredFace, EngineError> {
    let upload = store.scratch(image)?;
    let embedding = analyzer.represent(upload.path())?;
    tracing::debug!(
        student_id = %id,
        dim = embedding.values.len(),
        "register: embedding extracted"
    );

    let face = store.persist(id, upload)?;
    tracing::info!(student_id = %id, path = %face.path.display(), "register: face stored");
    Ok(face)
}

/// Write the upload to scratch and run the configured strategy against the store.
/// The scratch file is gone by the time this returns.
fn run_verify<E: Embedder>(
    analyzer: &mut FaceAnalyzer<E>,
    store: &dyn FaceStore,
    settings: &EngineSettings,
    image: &[u8],
) -> Result<MatchOutcome, EngineError> {
    let upload = store.scratch(image)?;
    let gallery = store.faces()?;
    tracing::debug!(
        candidates = gallery.len(),
        strategy = %settings.strategy,
        "verify: starting"
    );

    matching::run(settings.strategy, settings.on_failure, analyzer, upload.path(), &gallery)
}
