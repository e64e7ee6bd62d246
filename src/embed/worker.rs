//! Background embedding worker.
//!
//! Consumes signals emitted by the catalog upsert path, generates the
//! embedding for the changed resource, stores it, and refreshes the
//! similarity index. One failed resource is logged and skipped; the
//! worker itself only exits when the signal channel closes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::CatalogStore;

use super::{vec_to_blob, Embedder, SimilarityProvider};

/// Notification that a resource's content changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingSignal {
    /// Resource whose embedding is stale.
    pub resource_id: i64,
}

/// Spawns the embedding worker task.
///
/// The returned handle completes when every sender for `rx` is dropped.
pub fn spawn_embedding_worker(
    store: CatalogStore,
    embedder: Arc<dyn Embedder>,
    similarity: Arc<dyn SimilarityProvider>,
    mut rx: mpsc::UnboundedReceiver<EmbeddingSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(dims = embedder.dims(), "embedding worker started");
        while let Some(signal) = rx.recv().await {
            if let Err(error) = embed_one(&store, embedder.as_ref(), similarity.as_ref(), signal.resource_id).await {
                warn!(resource_id = signal.resource_id, error = %error, "embedding failed, skipping resource");
            }
        }
        info!("embedding worker stopped");
    })
}

async fn embed_one(
    store: &CatalogStore,
    embedder: &dyn Embedder,
    similarity: &dyn SimilarityProvider,
    resource_id: i64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let resource = store.get_resource(resource_id).await?;

    let text = if resource.description.is_empty() {
        resource.title.clone()
    } else {
        format!("{}\n{}", resource.title, resource.description)
    };

    let vector = embedder.encode(&text).await?;
    store.set_embedding(resource_id, &vec_to_blob(&vector)).await?;
    similarity.upsert_point(resource_id, &vector).await?;
    debug!(resource_id, "embedding refreshed");
    Ok(())
}
