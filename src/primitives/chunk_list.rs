//! An append-only list of fixed-size chunks, used as the per-bucket buffer
//! in the hash exchange (spec §4.4) and as the spooled-output buffer for
//! `FullyBuffered` merges (spec §4.6).
//!
//! Growing one `Vec<T>` without bound means an unlucky resize copies every
//! element seen so far; appending in fixed chunks bounds each grow to one
//! chunk's worth of work instead, the same tradeoff the teacher's
//! `VecOps::split` makes when carving a source into partitions.

const DEFAULT_CHUNK_SIZE: usize = 128;

/// A growable, append-only sequence stored as a list of `Vec<T>` chunks.
pub struct ChunkList<T> {
    chunks: Vec<Vec<T>>,
    chunk_size: usize,
    len: usize,
}

impl<T> Default for ChunkList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChunkList<T> {
    /// Build an empty list using the default chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Build an empty list with an explicit chunk size.
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunks: Vec::new(),
            chunk_size: chunk_size.max(1),
            len: 0,
        }
    }

    /// Append one element, starting a new chunk if the last one is full.
    pub fn push(&mut self, value: T) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < self.chunk_size => chunk.push(value),
            _ => {
                let mut chunk = Vec::with_capacity(self.chunk_size);
                chunk.push(value);
                self.chunks.push(chunk);
            }
        }
        self.len += 1;
    }

    /// Total number of elements appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over every element in append order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flat_map(|c| c.iter())
    }

    /// Consume the list, producing one flat `Vec<T>` in append order.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks {
            out.extend(chunk);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_append_order_across_chunk_boundaries() {
        let mut list = ChunkList::with_chunk_size(4);
        for i in 0..17 {
            list.push(i);
        }
        assert_eq!(list.len(), 17);
        let collected: Vec<_> = list.iter().copied().collect();
        assert_eq!(collected, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn into_vec_matches_iter_order() {
        let mut list = ChunkList::with_chunk_size(3);
        for i in 0..10 {
            list.push(i);
        }
        assert_eq!(list.into_vec(), (0..10).collect::<Vec<_>>());
    }
}
