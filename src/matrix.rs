use rayon::prelude::*;

use crate::error::{Result, VocoderError};

/// Row-major `rows x cols` matrix; one row per analysis frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl FrameMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Builds a matrix from equally sized rows. `cols` is needed for the
    /// zero-row case.
    pub fn from_rows(rows: Vec<Vec<f64>>, cols: usize) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in &rows {
            if row.len() != cols {
                return Err(VocoderError::invalid_length("matrix row", cols, row.len()));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(VocoderError::invalid_length(
                "matrix data",
                rows * cols,
                data.len(),
            ));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    pub fn row_mut(&mut self, index: usize) -> &mut [f64] {
        &mut self.data[index * self.cols..(index + 1) * self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks(self.cols.max(1)).take(self.rows)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f64]> + '_ {
        let rows = self.rows;
        self.data.chunks_mut(self.cols.max(1)).take(rows)
    }

    pub fn par_rows_mut(&mut self) -> rayon::slice::ChunksMut<'_, f64> {
        self.data.par_chunks_mut(self.cols.max(1))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows() {
        let m = FrameMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(m.num_rows(), 2);
        assert_eq!(m.num_cols(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.get(0, 1), 2.0);
        assert_eq!(m.rows().count(), 2);
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        let err = FrameMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]], 2).unwrap_err();
        assert!(matches!(err, VocoderError::InvalidLength { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_empty_matrix_keeps_cols() {
        let m = FrameMatrix::from_rows(Vec::new(), 513).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.num_cols(), 513);
        assert_eq!(m.rows().count(), 0);
    }

    #[test]
    fn test_row_mut() {
        let mut m = FrameMatrix::new(3, 2);
        m.row_mut(2)[1] = 5.0;
        for row in m.rows_mut() {
            row[0] = 1.0;
        }
        assert_eq!(m.as_slice(), &[1.0, 0.0, 1.0, 0.0, 1.0, 5.0]);
    }
}
