//! Row-major embedding matrix.

use half::f16;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;

/// A dense `rows × dim` matrix of `f32` embeddings stored row-major.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Create an empty matrix with the given row width.
    pub fn new(dim: usize) -> Self {
        Self {
            rows: 0,
            dim,
            data: Vec::new(),
        }
    }

    /// Build a matrix from individual rows of equal length.
    pub fn from_rows(dim: usize, rows: Vec<Embedding>) -> Result<Self> {
        let mut matrix = Self::new(dim);
        for row in rows {
            matrix.push_row(&row)?;
        }
        Ok(matrix)
    }

    /// Append a row.
    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    /// Append every row of another matrix.
    pub fn extend(&mut self, other: &EmbeddingMatrix) -> Result<()> {
        if other.rows > 0 && other.dim != self.dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim,
                actual: other.dim,
            });
        }
        self.data.extend_from_slice(&other.data);
        self.rows += other.rows;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Borrow row `i`.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if i >= self.rows {
            return None;
        }
        let start = i * self.dim;
        self.data.get(start..start + self.dim)
    }

    /// Iterate over rows in order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.rows).filter_map(move |i| self.row(i))
    }

    /// L2-normalize every row in place.
    pub fn normalize_rows(&mut self) {
        if self.dim == 0 {
            return;
        }
        for row in self.data.chunks_exact_mut(self.dim) {
            normalize(row);
        }
    }

    /// Copy the rows out as owned vectors.
    pub fn to_rows(&self) -> Vec<Embedding> {
        self.iter().map(<[f32]>::to_vec).collect()
    }

    /// Encode as little-endian float16.
    pub fn to_f16_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 2);
        for value in &self.data {
            out.extend_from_slice(&f16::from_f32(*value).to_le_bytes());
        }
        out
    }

    /// Decode little-endian float16 bytes, promoting to `f32`.
    ///
    /// Returns `None` if the byte length does not match `rows × dim`.
    pub fn from_f16_bytes(bytes: &[u8], rows: usize, dim: usize) -> Option<Self> {
        let expected = rows.checked_mul(dim)?.checked_mul(2)?;
        if bytes.len() != expected {
            return None;
        }
        let data = bytes
            .chunks_exact(2)
            .map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32())
            .collect();
        Some(Self { rows, dim, data })
    }
}
