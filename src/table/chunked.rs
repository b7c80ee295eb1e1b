//! Bounded-size reads.
//!
//! The transport caps message size, so reads of many rows are split into
//! chunks whose estimated payload stays under the cap. Every scalar is
//! assumed to be 8 bytes wide.

use crate::error::{FeatureStoreError, Result};
use crate::table::columns::{ColumnData, ColumnDef, RawRow, TableData};
use tracing::debug;

pub fn row_width(columns: &[ColumnDef]) -> usize {
    columns.iter().map(ColumnDef::width).sum()
}

/// Rows per read so that `chunk * row bytes <= max_message_bytes`, at least 1.
pub fn chunk_size_for(columns: &[ColumnDef], max_message_bytes: usize, bytes_per_scalar: usize) -> usize {
    let row_bytes = row_width(columns).max(1).saturating_mul(bytes_per_scalar.max(1));
    (max_message_bytes / row_bytes).max(1)
}

/// Reads `offsets` in slices of `chunk_size`, concatenating each column
/// across chunks in request order.
pub fn chunked_read<F>(
    columns: &[ColumnDef],
    offsets: &[u64],
    chunk_size: usize,
    mut read: F,
) -> Result<Vec<ColumnData>>
where
    F: FnMut(&[u64]) -> Result<TableData>,
{
    let chunk_size = chunk_size.max(1);
    let mut values: Vec<ColumnData> = columns.iter().map(ColumnData::empty_for).collect();
    debug!(rows = offsets.len(), chunk_size, "chunked table read");
    for (n, chunk) in offsets.chunks(chunk_size).enumerate() {
        debug!(chunk_offset = n * chunk_size, chunk_size, "reading chunk");
        let data = read(chunk)?;
        if data.columns.len() != values.len() {
            return Err(FeatureStoreError::backend(
                "read coordinates",
                format!(
                    "expected {} columns, received {}",
                    values.len(),
                    data.columns.len()
                ),
            ));
        }
        for (acc, col) in values.iter_mut().zip(data.columns) {
            if col.len() != chunk.len() {
                return Err(FeatureStoreError::backend(
                    "read coordinates",
                    format!("expected {} rows, received {}", chunk.len(), col.len()),
                ));
            }
            acc.extend(col)?;
        }
    }
    Ok(values)
}

/// Transposes column-major data into one row per offset.
pub fn columns_to_rows(columns: Vec<ColumnData>) -> Result<Vec<RawRow>> {
    let n = columns.first().map(ColumnData::len).unwrap_or(0);
    if columns.iter().any(|c| c.len() != n) {
        return Err(FeatureStoreError::backend(
            "read coordinates",
            "columns have different lengths",
        ));
    }
    let mut iters: Vec<_> = columns.into_iter().map(ColumnData::into_cells).collect();
    let mut rows = Vec::with_capacity(n);
    for _ in 0..n {
        let row: RawRow = iters.iter_mut().filter_map(Iterator::next).collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::{chunk_size_for, chunked_read, columns_to_rows};
    use crate::error::Result;
    use crate::table::columns::{Cell, ColumnData, ColumnDef, ObjectKind, TableData};
    use proptest::prelude::*;

    fn single_column() -> Vec<ColumnDef> {
        vec![ColumnDef::object_id(ObjectKind::Primary)]
    }

    fn feature_columns(width: usize) -> Vec<ColumnDef> {
        vec![
            ColumnDef::object_id(ObjectKind::Primary),
            ColumnDef::object_id(ObjectKind::Secondary),
            ColumnDef::double_array("f", width),
        ]
    }

    /// Row `i` holds `i`, `-i` and `[i; width]`, truncated to `ncols` columns.
    fn reader(ncols: usize, width: usize) -> impl FnMut(&[u64]) -> Result<TableData> {
        move |offsets: &[u64]| {
            let ids: Vec<i64> = offsets.iter().map(|&o| o as i64).collect();
            let columns = vec![
                ColumnData::Long(ids.clone()),
                ColumnData::Long(ids.iter().map(|i| -i).collect()),
                ColumnData::DoubleArray(ids.iter().map(|&i| vec![i as f64; width]).collect()),
            ];
            Ok(TableData {
                row_numbers: offsets.to_vec(),
                columns: columns.into_iter().take(ncols).collect(),
            })
        }
    }

    #[test]
    fn chunk_size_stays_under_sixteen_mib() {
        let max = 16 * 1024 * 1024;
        // 2 id columns + 10 features = 12 scalars = 96 bytes per row.
        assert_eq!(chunk_size_for(&feature_columns(10), max, 8), max / 96);
        // A single row larger than the limit still reads one row at a time.
        assert_eq!(chunk_size_for(&feature_columns(4 * 1024 * 1024), max, 8), 1);
        assert_eq!(chunk_size_for(&[], max, 8), max / 8);
    }

    #[test]
    fn empty_offsets_make_no_reads() {
        let mut calls = 0;
        let cols = chunked_read(&feature_columns(2), &[], 4, |_| {
            calls += 1;
            Ok(TableData::default())
        })
        .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(cols.len(), 3);
        assert!(cols.iter().all(ColumnData::is_empty));
        assert!(columns_to_rows(cols).unwrap().is_empty());
    }

    #[test]
    fn chunks_are_requested_in_order() {
        let mut requested = Vec::new();
        let mut inner = reader(1, 0);
        let offsets = [4u64, 9, 11, 20, 21];
        let cols = chunked_read(&single_column(), &offsets, 2, |chunk| {
            requested.push(chunk.to_vec());
            inner(chunk)
        })
        .unwrap();
        assert_eq!(requested, vec![vec![4, 9], vec![11, 20], vec![21]]);
        assert_eq!(cols, vec![ColumnData::Long(vec![4, 9, 11, 20, 21])]);
    }

    #[test]
    fn rows_are_transposed() {
        let cols = chunked_read(&feature_columns(2), &[3, 5], 1, reader(3, 2)).unwrap();
        let rows = columns_to_rows(cols).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Cell::Long(3), Cell::Long(-3), Cell::DoubleArray(vec![3.0, 3.0])],
                vec![Cell::Long(5), Cell::Long(-5), Cell::DoubleArray(vec![5.0, 5.0])],
            ]
        );
    }

    #[test]
    fn short_chunk_is_an_error() {
        let err = chunked_read(&single_column(), &[1, 2], 2, |_| {
            Ok(TableData {
                row_numbers: vec![1],
                columns: vec![ColumnData::Long(vec![1])],
            })
        })
        .unwrap_err();
        assert_eq!(err.code_str(), "backend");
    }

    proptest! {
        #[test]
        fn chunked_equals_unchunked(
            offsets in prop::collection::vec(0u64..1000, 0..40),
            chunk_size in 1usize..12,
            multi in any::<bool>(),
        ) {
            let (defs, ncols) = if multi { (feature_columns(3), 3) } else { (single_column(), 1) };
            let whole = chunked_read(&defs, &offsets, offsets.len().max(1), reader(ncols, 3)).unwrap();
            let chunked = chunked_read(&defs, &offsets, chunk_size, reader(ncols, 3)).unwrap();
            prop_assert_eq!(&whole, &chunked);
            prop_assert_eq!(columns_to_rows(chunked).unwrap().len(), offsets.len());
        }
    }
}
