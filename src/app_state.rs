use std::sync::Arc;

use crate::services::{content_store::ContentStore, queue::JobQueue, submitter::Submitter};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub submitter: Arc<Submitter>,
    pub store: Arc<ContentStore>,
    pub queue: JobQueue,
}

impl AppState {
    pub fn new(submitter: Submitter, store: Arc<ContentStore>, queue: JobQueue) -> Self {
        Self {
            submitter: Arc::new(submitter),
            store,
            queue,
        }
    }
}
