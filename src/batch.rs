//! Splits large collections into fixed-size playlist windows and runs them
//! one after another.

use crate::events::SessionSink;
use crate::registry::CancelToken;
use crate::Result;
use serde::Serialize;

pub const CHUNK_SIZE: usize = 200;
/// Collections with more items than this are downloaded chunk by chunk.
pub const LARGE_COLLECTION_THRESHOLD: usize = 200;

/// 1-based inclusive window over a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub start_index: usize,
    pub end_index: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        (self.end_index + 1).saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.end_index < self.start_index
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: Vec<Chunk>,
}

impl ChunkReport {
    /// Items covered by chunks that finished without error.
    pub fn completed_items(&self, total: usize) -> usize {
        let failed: usize = self.failed_chunks.iter().map(Chunk::len).sum();
        total.saturating_sub(failed)
    }
}

pub fn plan_chunks(total: usize, chunk_size: usize) -> Vec<Chunk> {
    let size = chunk_size.max(1);
    (0..total.div_ceil(size))
        .map(|i| Chunk {
            start_index: i * size + 1,
            end_index: ((i + 1) * size).min(total),
        })
        .collect()
}

/// Runs `invoke` for each chunk in order. A failed chunk is logged and
/// counted; cancellation and a missing tool stop the loop and propagate.
pub fn run_chunks(
    token: &CancelToken,
    total: usize,
    chunk_size: usize,
    sink: &dyn SessionSink,
    invoke: &mut dyn FnMut(Chunk) -> Result<()>,
) -> Result<ChunkReport> {
    let session = token.session();
    let chunks = plan_chunks(total, chunk_size);
    let mut report = ChunkReport {
        total_chunks: chunks.len(),
        ..Default::default()
    };

    for (idx, chunk) in chunks.into_iter().enumerate() {
        token.check()?;
        sink.log(
            session,
            &format!(
                "Downloading chunk {}/{} (items {}-{} of {total})",
                idx + 1,
                report.total_chunks,
                chunk.start_index,
                chunk.end_index
            ),
        );
        match invoke(chunk) {
            Ok(()) => report.completed_chunks += 1,
            Err(err) if err.aborts_session() => return Err(err),
            Err(err) => {
                token.check()?;
                log::warn!(
                    "session {session}: chunk {}-{} failed: {err}",
                    chunk.start_index,
                    chunk.end_index
                );
                sink.log(
                    session,
                    &format!(
                        "Chunk {}-{} failed, continuing: {err}",
                        chunk.start_index, chunk.end_index
                    ),
                );
                report.failed_chunks.push(chunk);
            }
        }
    }
    Ok(report)
}
