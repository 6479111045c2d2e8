//! Exact nearest-neighbor index over dense course-title vectors.
//!
//! The index is built once from a vector table and is read-only afterwards, so a
//! single instance can be shared across request tasks without locking.

use std::cmp::Ordering;
use std::fmt;

/// Errors raised while building or querying a [`FlatIndex`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The index holds no vectors.
    Empty,
    /// A vector's length differs from the index dimension.
    DimensionMismatch {
        /// Dimension fixed by the first row of the table.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },
    /// The table has rows but their vectors have no components.
    ZeroDimension {
        /// Number of zero-length rows.
        rows: usize,
    },
    /// A row contains NaN or an infinite component.
    NonFinite {
        /// Zero-based row position.
        row: usize,
    },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "similarity index is empty"),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "vector dimension {} does not match index dimension {}",
                actual, expected
            ),
            Self::ZeroDimension { rows } => {
                write!(f, "vector table has {} rows but zero-length vectors", rows)
            }
            Self::NonFinite { row } => write!(f, "row {} contains a non-finite component", row),
        }
    }
}

impl std::error::Error for IndexError {}

/// One search hit: a row position plus its squared Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row position in the catalog the index was built from.
    pub row: usize,
    /// Squared L2 distance to the query vector.
    pub distance: f32,
}

/// Brute-force squared-L2 index with contiguous row storage.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Builds an index from row vectors, validating shape and finiteness.
    pub fn build(rows: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if dim == 0 && !rows.is_empty() {
            return Err(IndexError::ZeroDimension { rows: rows.len() });
        }
        let mut data = Vec::with_capacity(dim * rows.len());
        for (row, vector) in rows.into_iter().enumerate() {
            if vector.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(IndexError::NonFinite { row });
            }
            data.extend_from_slice(&vector);
        }
        Ok(Self { dim, data })
    }

    /// Vector dimensionality (0 for an empty index).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    /// True when no rows were indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns up to `k` nearest rows, closest first.
    ///
    /// Equal distances keep ascending row order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.is_empty() {
            return Err(IndexError::Empty);
        }
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(row, vector)| Neighbor {
                row,
                distance: squared_l2(vector, query),
            })
            .collect();
        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance_then_row);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance_then_row);
        Ok(scored)
    }
}

fn by_distance_then_row(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.row.cmp(&b.row))
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}
