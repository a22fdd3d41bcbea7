//! # Flat similarity index
//!
//! Exact nearest-neighbor search by inner product over a contiguous `count × dimension`
//! buffer of `f32`. Rows are only ever appended; ordinals are positions in that buffer.
//! Callers normalize vectors with [`l2_normalize`] before adding or searching, which makes
//! the inner product a cosine similarity.
//!
//! ## File layout
//! ```text
//! b"LRIX" | version: u32 LE | blake3(payload): [u8; 32] | payload (bincode)
//! ```
//! Anything that does not match this layout loads as [`IndexError::Corrupt`].

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::IndexError;

const MAGIC: &[u8; 4] = b"LRIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 32;

/// L2-normalize `vector` in place. A zero vector is left as is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    count: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// An empty index for vectors of width `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            count: 0,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Stored rows, in ordinal order.
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1)).take(self.count)
    }

    /// Append rows. Every vector must have width `dimension`; nothing is added if
    /// any of them doesn't. New rows get ordinals `count..count + vectors.len()`.
    pub fn add<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<(), IndexError> {
        if self.dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        if let Some(bad) = vectors
            .iter()
            .map(AsRef::as_ref)
            .find(|v| v.len() != self.dimension)
        {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector.as_ref());
        }
        self.count += vectors.len();
        Ok(())
    }

    /// Up to `k` `(score, ordinal)` pairs, best first. Equal scores keep ordinal order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let k = k.min(self.count);
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = self.data[..self.count * self.dimension]
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(ordinal, row)| (dot(row, query), ordinal))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Encode the full index into the on-disk layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let payload = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        let checksum = blake3::hash(&payload);

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(checksum.as_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Corrupt(format!(
                "file is {} bytes, shorter than the header",
                bytes.len()
            )));
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);
        if &header[..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&header[4..8]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }
        if blake3::hash(payload).as_bytes()[..] != header[8..HEADER_LEN] {
            return Err(IndexError::Corrupt("checksum mismatch".into()));
        }

        let (index, _): (FlatIndex, usize) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|err| IndexError::Corrupt(err.to_string()))?;

        let expected = index.count.checked_mul(index.dimension);
        if expected != Some(index.data.len()) {
            return Err(IndexError::Corrupt(format!(
                "{} values stored for {} rows of width {}",
                index.data.len(),
                index.count,
                index.dimension
            )));
        }
        Ok(index)
    }

    pub fn persist(&self, path: &Path) -> Result<(), IndexError> {
        let staged = crate::store::stage_file(path, &self.to_bytes()?)?;
        staged.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Read an index file. Unreadable or malformed files are [`IndexError::Corrupt`].
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path)
            .map_err(|err| IndexError::Corrupt(format!("{}: {err}", path.display())))?;
        Self::from_bytes(&bytes)
    }
}
