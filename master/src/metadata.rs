use std::sync::Arc;

use common::MetadataStore;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::tracker::CompletionEvent;

/// Copies every job result from the completion stream into the metadata
/// store. Returns once the scheduler is gone.
pub async fn persist_results(
    mut events: broadcast::Receiver<CompletionEvent>,
    store: Arc<dyn MetadataStore>,
) {
    loop {
        match events.recv().await {
            Ok(event) => match store.update(&event.job_id, &event.result) {
                Ok(()) => debug!("stored result of job {}", event.job_id),
                Err(e) => warn!("could not store result of job {}: {}", event.job_id, e),
            },
            Err(RecvError::Lagged(missed)) => {
                warn!("metadata writer lagged, {} job results not stored", missed);
            }
            Err(RecvError::Closed) => {
                info!("completion stream closed, metadata writer stopping");
                break;
            }
        }
    }
}
