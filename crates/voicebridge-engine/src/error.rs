//! Bridge engine error types.

/// Errors surfaced by the engine channels.
///
/// Request failures are reported asynchronously through the channel event
/// stream (method-failed responses, `ERROR` completions); transport errors
/// stay inside the workers. These variants cover the cases where a request
/// cannot even be enqueued.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The background worker thread could not be spawned.
    #[error("failed to spawn background worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The background worker has shut down.
    #[error("background worker is gone")]
    WorkerGone,

    /// The background worker's queue is full; the work item was dropped.
    #[error("background worker queue is full")]
    QueueFull,
}
