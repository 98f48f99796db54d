//! Slice validation and chunk-to-selection arithmetic.

use crate::error::{RemoteArrayError, Result};

/// A rectangular region of a dataset: `start[d]..start[d] + shape[d]` on
/// every dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub start: Vec<u64>,
    pub shape: Vec<u64>,
}

/// Reject a slice with more dimensions than an adapter supports.
///
/// Runs before any I/O so that unsupported requests cost nothing.
pub fn check_slice_dims(requested: usize, supported: usize) -> Result<()> {
    if requested > supported {
        return Err(RemoteArrayError::UnsupportedSlice {
            requested,
            supported,
        });
    }
    Ok(())
}

impl Selection {
    /// Resolve an optional leading-dimension slice against a dataset shape.
    pub fn resolve(shape: &[u64], slice: Option<&[(u64, u64)]>, max_dims: usize) -> Result<Self> {
        let slice = slice.unwrap_or(&[]);
        check_slice_dims(slice.len(), max_dims)?;

        if slice.len() > shape.len() {
            return Err(RemoteArrayError::invalid_slice(format!(
                "{} slice dimensions for a dataset of rank {}",
                slice.len(),
                shape.len()
            )));
        }

        let mut start = Vec::with_capacity(shape.len());
        let mut sel_shape = Vec::with_capacity(shape.len());
        for (d, &extent) in shape.iter().enumerate() {
            match slice.get(d) {
                Some(&(s, e)) => {
                    if s > e || e > extent {
                        return Err(RemoteArrayError::invalid_slice(format!(
                            "[{}, {}) is outside dimension {} of extent {}",
                            s, e, d, extent
                        )));
                    }
                    start.push(s);
                    sel_shape.push(e - s);
                }
                None => {
                    start.push(0);
                    sel_shape.push(extent);
                }
            }
        }

        Ok(Self {
            start,
            shape: sel_shape,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of selected elements (1 for a scalar).
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    fn end(&self, d: usize) -> u64 {
        self.start[d] + self.shape[d]
    }

    /// Grid indices of every chunk intersecting the selection, in row-major
    /// order.
    pub fn chunk_indices(&self, chunk_shape: &[u64]) -> Vec<Vec<u64>> {
        if self.rank() == 0 {
            return vec![vec![]];
        }
        if self.shape.iter().any(|&n| n == 0) || chunk_shape.iter().any(|&c| c == 0) {
            return vec![];
        }

        let ranges: Vec<(u64, u64)> = (0..self.rank())
            .map(|d| {
                let c = chunk_shape[d];
                (self.start[d] / c, (self.end(d) - 1) / c)
            })
            .collect();

        let mut out = Vec::new();
        let mut current: Vec<u64> = ranges.iter().map(|r| r.0).collect();
        loop {
            out.push(current.clone());
            // Odometer increment, last dimension fastest.
            let mut d = self.rank();
            loop {
                if d == 0 {
                    return out;
                }
                d -= 1;
                if current[d] < ranges[d].1 {
                    current[d] += 1;
                    break;
                }
                current[d] = ranges[d].0;
            }
        }
    }

    /// Copy the overlap of a chunk into `out`, which holds this selection in
    /// row-major order. `chunk` holds `chunk_shape` elements in row-major
    /// order with its first element at `chunk_origin`.
    pub fn copy_overlap<T: Clone>(
        &self,
        out: &mut [T],
        chunk: &[T],
        chunk_origin: &[u64],
        chunk_shape: &[u64],
    ) -> Result<()> {
        let chunk_len: u64 = chunk_shape.iter().product();
        if chunk.len() as u64 != chunk_len || out.len() as u64 != self.num_elements() {
            return Err(RemoteArrayError::corrupt(format!(
                "chunk of {} elements for shape {:?} into a selection of {} with a buffer of {}",
                chunk.len(),
                chunk_shape,
                self.num_elements(),
                out.len()
            )));
        }

        let rank = self.rank();
        if rank == 0 {
            if let (Some(dst), Some(src)) = (out.first_mut(), chunk.first()) {
                *dst = src.clone();
            }
            return Ok(());
        }

        let mut lo = Vec::with_capacity(rank);
        let mut hi = Vec::with_capacity(rank);
        for d in 0..rank {
            let l = self.start[d].max(chunk_origin[d]);
            let h = self.end(d).min(chunk_origin[d] + chunk_shape[d]);
            if l >= h {
                return Ok(());
            }
            lo.push(l);
            hi.push(h);
        }

        let out_strides = row_major_strides(&self.shape);
        let chunk_strides = row_major_strides(chunk_shape);
        let run = (hi[rank - 1] - lo[rank - 1]) as usize;

        let mut idx = lo.clone();
        loop {
            let mut out_off = 0u64;
            let mut chunk_off = 0u64;
            for d in 0..rank {
                out_off += (idx[d] - self.start[d]) * out_strides[d];
                chunk_off += (idx[d] - chunk_origin[d]) * chunk_strides[d];
            }
            let (o, c) = (out_off as usize, chunk_off as usize);
            out[o..o + run].clone_from_slice(&chunk[c..c + run]);

            // Advance over every dimension except the last.
            let mut d = rank - 1;
            loop {
                if d == 0 {
                    return Ok(());
                }
                d -= 1;
                idx[d] += 1;
                if idx[d] < hi[d] {
                    break;
                }
                idx[d] = lo[d];
            }
        }
    }
}

/// Row-major element strides for `shape`.
pub fn row_major_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Byte window `(offset, length)` of rows `start..end` in a contiguous
/// row-major payload.
pub fn contiguous_row_window(
    shape: &[u64],
    element_width: u64,
    rows: Option<(u64, u64)>,
) -> (u64, u64) {
    let row_elements: u64 = shape.iter().skip(1).product();
    let row_bytes = row_elements * element_width;
    match (shape.first(), rows) {
        (None, _) => (0, element_width),
        (Some(_), Some((start, end))) => (start * row_bytes, (end - start) * row_bytes),
        (Some(&n), None) => (0, n * row_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults_trailing_dims() {
        let sel = Selection::resolve(&[10, 4, 3], Some(&[(2, 5)]), 3).unwrap();
        assert_eq!(sel.start, vec![2, 0, 0]);
        assert_eq!(sel.shape, vec![3, 4, 3]);
        assert_eq!(sel.num_elements(), 36);
    }

    #[test]
    fn test_resolve_rejects_excess_dims_before_rank() {
        let err = Selection::resolve(&[10], Some(&[(0, 1), (0, 1), (0, 1)]), 2).unwrap_err();
        assert_eq!(
            err,
            RemoteArrayError::UnsupportedSlice {
                requested: 3,
                supported: 2
            }
        );

        let err = Selection::resolve(&[10], Some(&[(0, 1), (0, 1)]), 2).unwrap_err();
        assert!(matches!(err, RemoteArrayError::InvalidSlice(_)));
    }

    #[test]
    fn test_resolve_bounds() {
        assert!(Selection::resolve(&[4], Some(&[(3, 2)]), 1).is_err());
        assert!(Selection::resolve(&[4], Some(&[(0, 5)]), 1).is_err());
        let empty = Selection::resolve(&[4], Some(&[(2, 2)]), 1).unwrap();
        assert_eq!(empty.num_elements(), 0);
        assert!(empty.chunk_indices(&[2]).is_empty());
    }

    #[test]
    fn test_scalar_selection() {
        let sel = Selection::resolve(&[], None, 1).unwrap();
        assert_eq!(sel.num_elements(), 1);
        assert_eq!(sel.chunk_indices(&[]), vec![Vec::<u64>::new()]);

        let mut out = vec![0];
        sel.copy_overlap(&mut out, &[7], &[], &[]).unwrap();
        assert_eq!(out, vec![7]);
    }

    #[test]
    fn test_chunk_indices_2d() {
        // rows 3..7, cols 0..5 of a [10, 5] array chunked [4, 2]
        let sel = Selection::resolve(&[10, 5], Some(&[(3, 7)]), 2).unwrap();
        let chunks = sel.chunk_indices(&[4, 2]);
        assert_eq!(
            chunks,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2]
            ]
        );
    }

    #[test]
    fn test_copy_overlap_assembles_2d() {
        // 4x4 array with value r*4+c, chunked 2x2, select rows 1..3 cols 1..4
        let shape = [4u64, 4];
        let chunk_shape = [2u64, 2];
        let sel = Selection::resolve(&shape, Some(&[(1, 3), (1, 4)]), 2).unwrap();
        let mut out = vec![-1i32; sel.num_elements() as usize];

        for idx in sel.chunk_indices(&chunk_shape) {
            let origin: Vec<u64> = idx.iter().zip(&chunk_shape).map(|(i, c)| i * c).collect();
            let mut chunk = Vec::new();
            for r in 0..2 {
                for c in 0..2 {
                    chunk.push(((origin[0] + r) * 4 + origin[1] + c) as i32);
                }
            }
            sel.copy_overlap(&mut out, &chunk, &origin, &chunk_shape)
                .unwrap();
        }

        assert_eq!(out, vec![5, 6, 7, 9, 10, 11]);
    }

    #[test]
    fn test_copy_overlap_padded_edge_chunk() {
        // length-5 array chunked by 4: the second chunk is padded to 4.
        let sel = Selection::resolve(&[5], None, 1).unwrap();
        let mut out = vec![0u8; 5];
        sel.copy_overlap(&mut out, &[1, 2, 3, 4], &[0], &[4]).unwrap();
        sel.copy_overlap(&mut out, &[5, 0, 0, 0], &[4], &[4]).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_copy_overlap_short_chunk_is_corrupt() {
        let sel = Selection::resolve(&[4], None, 1).unwrap();
        let mut out = vec![0u8; 4];
        let err = sel.copy_overlap(&mut out, &[1, 2], &[0], &[4]).unwrap_err();
        assert!(matches!(err, RemoteArrayError::CorruptChunk(_)));
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_row_major_strides() {
        assert_eq!(row_major_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(row_major_strides(&[7]), vec![1]);
        assert!(row_major_strides(&[]).is_empty());
    }

    #[test]
    fn test_contiguous_row_window() {
        assert_eq!(contiguous_row_window(&[4], 4, Some((1, 3))), (4, 8));
        assert_eq!(contiguous_row_window(&[10, 3], 2, Some((2, 4))), (12, 12));
        assert_eq!(contiguous_row_window(&[10, 3], 2, None), (0, 60));
        assert_eq!(contiguous_row_window(&[], 8, None), (0, 8));
    }
}
