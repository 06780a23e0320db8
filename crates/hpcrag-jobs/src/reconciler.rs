//! Result validation and write-back into the vector and graph stores.
//!
//! The two writes are independent and not transactional. A job whose vectors
//! landed but whose graph write failed (or the reverse) is still completed,
//! with a [`PartialWriteWarning`] naming the store that needs repair.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use hpcrag_core::{
    ChunkEntity, DocumentMetadata, FailureCause, GraphStore, JobFailure, PartialWriteWarning,
    Result, StoreKind, VectorStore,
};

/// How a write-back ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Both stores accepted their writes.
    Written,
    /// Exactly one store failed.
    Partial(PartialWriteWarning),
    /// Both stores failed.
    Failed(JobFailure),
}

/// Check embedding artifacts before anything is written.
///
/// Schema problems yield `invalid_result`; a vector width other than
/// `dimension` yields `dimension_mismatch`. Empty but equal-length
/// artifacts are valid.
pub fn validate_embeddings(
    embeddings: &[Vec<f32>],
    texts: &[String],
    dimension: usize,
) -> std::result::Result<(), JobFailure> {
    if embeddings.len() != texts.len() {
        return Err(JobFailure::new(
            FailureCause::InvalidResult,
            format!(
                "{} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            ),
        ));
    }
    if let Some((index, vector)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, v)| v.len() != dimension)
    {
        return Err(JobFailure::new(
            FailureCause::DimensionMismatch,
            format!(
                "chunk {} has width {}, expected {}",
                index,
                vector.len(),
                dimension
            ),
        ));
    }
    if let Some(index) = embeddings
        .iter()
        .position(|v| v.iter().any(|x| !x.is_finite()))
    {
        return Err(JobFailure::new(
            FailureCause::InvalidResult,
            format!("chunk {} contains non-finite values", index),
        ));
    }
    Ok(())
}

/// Writes validated embedding results to both stores.
pub struct ResultReconciler {
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
    dimension: usize,
    batch_size: usize,
}

impl ResultReconciler {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        dimension: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            vector_store,
            graph_store,
            dimension,
            batch_size: batch_size.max(1),
        }
    }

    /// Validate, then write to both stores.
    ///
    /// Validation failures return before either store is touched.
    pub async fn reconcile(
        &self,
        job_id: Uuid,
        metadata: &DocumentMetadata,
        embeddings: &[Vec<f32>],
        texts: &[String],
    ) -> ReconcileOutcome {
        if let Err(failure) = validate_embeddings(embeddings, texts, self.dimension) {
            return ReconcileOutcome::Failed(failure);
        }
        if texts.is_empty() {
            info!(%job_id, document_id = %metadata.document_id, "Worker produced no chunks");
            return ReconcileOutcome::Written;
        }

        let start = Instant::now();
        let (vectors, graph) = tokio::join!(
            self.write_vectors(metadata, embeddings, texts),
            self.write_graph(metadata, texts),
        );

        match (vectors, graph) {
            (Ok(count), Ok(())) => {
                info!(
                    %job_id,
                    document_id = %metadata.document_id,
                    chunks = count,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Results written to vector and graph stores"
                );
                ReconcileOutcome::Written
            }
            (Ok(_), Err(e)) => {
                warn!(%job_id, store = "graph", error = %e, "Partial write: graph store failed");
                ReconcileOutcome::Partial(PartialWriteWarning {
                    store: StoreKind::Graph,
                    message: e.to_string(),
                })
            }
            (Err(e), Ok(())) => {
                warn!(%job_id, store = "vector", error = %e, "Partial write: vector store failed");
                ReconcileOutcome::Partial(PartialWriteWarning {
                    store: StoreKind::Vector,
                    message: e.to_string(),
                })
            }
            (Err(ve), Err(ge)) => ReconcileOutcome::Failed(JobFailure::new(
                FailureCause::WritebackFailed,
                format!("vector store: {}; graph store: {}", ve, ge),
            )),
        }
    }

    async fn write_vectors(
        &self,
        metadata: &DocumentMetadata,
        embeddings: &[Vec<f32>],
        texts: &[String],
    ) -> Result<usize> {
        let entities: Vec<ChunkEntity> = texts
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (text, embedding))| ChunkEntity {
                text: text.clone(),
                embedding: embedding.clone(),
                subject_name: metadata.subject_name.clone(),
                subject_age: metadata.subject_age,
                document_id: metadata.document_id.clone(),
                chunk_index,
            })
            .collect();

        let mut inserted = 0;
        for batch in entities.chunks(self.batch_size) {
            inserted += self.vector_store.insert(batch.to_vec()).await?;
        }
        self.vector_store.flush().await?;
        debug!(inserted, "Vector store flushed");
        Ok(inserted)
    }

    async fn write_graph(&self, metadata: &DocumentMetadata, texts: &[String]) -> Result<()> {
        self.graph_store
            .upsert_subject(&metadata.subject_name, metadata.subject_age)
            .await?;
        for (chunk_index, text) in texts.iter().enumerate() {
            self.graph_store
                .merge_document_chunk(
                    &metadata.document_id,
                    text,
                    &metadata.subject_name,
                    chunk_index,
                )
                .await?;
        }
        Ok(())
    }
}
