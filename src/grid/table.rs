//! Row-oriented persistence of aggregated arrays (CSV and Parquet)
//!
//! One column per axis, in axis order, plus a [`VALUE_COLUMN`] holding the
//! metric value. Only filled cells become rows. Axis columns are typed from
//! their domain:
//!
//! | domain            | column    |
//! |-------------------|-----------|
//! | integers          | `Int64`   |
//! | numbers           | `Float64` |
//! | booleans          | `Boolean` |
//! | anything else     | `Utf8`    |
//!
//! Null coordinates are written as nulls. Tuples are written as their
//! display string and read back as strings.
//!
//! CSV carries no column types, so reading infers them: a text axis whose
//! values all look like numbers (`precision: ["16", "32"]`) comes back as
//! a numeric axis. Parquet keeps the written types.

use super::{AggregatedArray, Axis, Coord};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::fs::{self, File};
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Name of the column holding metric values.
pub const VALUE_COLUMN: &str = "metrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

impl ColumnKind {
    fn of(domain: &[Coord]) -> Self {
        let mut values = domain.iter().filter(|c| !c.is_null()).peekable();
        if values.peek().is_none() {
            return Self::Text;
        }
        let values: Vec<&Coord> = values.collect();
        if values.iter().all(|c| matches!(c, Coord::Int(_))) {
            Self::Int
        } else if values.iter().all(|c| c.as_f64().is_some()) {
            Self::Float
        } else if values.iter().all(|c| matches!(c, Coord::Bool(_))) {
            Self::Bool
        } else {
            Self::Text
        }
    }

    const fn data_type(self) -> DataType {
        match self {
            Self::Int => DataType::Int64,
            Self::Float => DataType::Float64,
            Self::Bool => DataType::Boolean,
            Self::Text => DataType::Utf8,
        }
    }

    fn encode(self, coords: &[&Coord]) -> ArrayRef {
        match self {
            Self::Int => Arc::new(Int64Array::from(
                coords
                    .iter()
                    .map(|c| match c {
                        Coord::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            Self::Float => Arc::new(Float64Array::from(
                coords.iter().map(|c| c.as_f64()).collect::<Vec<_>>(),
            )),
            Self::Bool => Arc::new(BooleanArray::from(
                coords
                    .iter()
                    .map(|c| match c {
                        Coord::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            Self::Text => Arc::new(StringArray::from(
                coords
                    .iter()
                    .map(|c| (!c.is_null()).then(|| c.to_string()))
                    .collect::<Vec<_>>(),
            )),
        }
    }
}

/// One row per filled cell.
///
/// # Errors
///
/// Returns error if an axis is named like the value column.
pub fn to_record_batch(array: &AggregatedArray) -> Result<RecordBatch> {
    if array.axis(VALUE_COLUMN).is_some() {
        return Err(Error::Table(format!(
            "axis '{VALUE_COLUMN}' collides with the value column"
        )));
    }

    let n_axes = array.axes().len();
    let mut columns: Vec<Vec<&Coord>> = vec![Vec::new(); n_axes];
    let mut values = Vec::new();
    for (coords, value) in array.iter_filled() {
        for (column, coord) in columns.iter_mut().zip(coords) {
            column.push(coord);
        }
        values.push(value);
    }

    let mut fields = Vec::with_capacity(n_axes + 1);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(n_axes + 1);
    for (axis, coords) in array.axes().iter().zip(&columns) {
        let kind = ColumnKind::of(axis.domain());
        fields.push(Field::new(axis.name(), kind.data_type(), true));
        arrays.push(kind.encode(coords));
    }
    fields.push(Field::new(VALUE_COLUMN, DataType::Float64, false));
    arrays.push(Arc::new(Float64Array::from(values)));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn decode<A: Array>(column: &A, coord: impl Fn(usize) -> Coord) -> Vec<Coord> {
    (0..column.len())
        .map(|i| if column.is_null(i) { Coord::Null } else { coord(i) })
        .collect()
}

fn decode_column(column: &ArrayRef) -> Result<Vec<Coord>> {
    let any = column.as_any();
    if let Some(a) = any.downcast_ref::<Int64Array>() {
        return Ok(decode(a, |i| Coord::Int(a.value(i))));
    }
    if let Some(a) = any.downcast_ref::<Float64Array>() {
        return Ok(decode(a, |i| Coord::Float(a.value(i))));
    }
    if let Some(a) = any.downcast_ref::<BooleanArray>() {
        return Ok(decode(a, |i| Coord::Bool(a.value(i))));
    }
    let text = arrow::compute::cast(column, &DataType::Utf8)?;
    let a = text
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Table(format!("cannot read {} column", column.data_type())))?;
    Ok(decode(a, |i| Coord::Str(a.value(i).to_string())))
}

/// Rebuild an array from rows: every non-value column is an axis whose
/// domain is its sorted unique values.
///
/// # Errors
///
/// Returns error if the value column is missing or not numeric.
pub fn from_record_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<AggregatedArray> {
    let value_index = schema
        .index_of(VALUE_COLUMN)
        .map_err(|_| Error::Table(format!("table has no '{VALUE_COLUMN}' column")))?;
    let axis_names: Vec<&str> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != value_index)
        .map(|(_, f)| f.name().as_str())
        .collect();

    let mut rows: Vec<(Vec<Coord>, Option<f64>)> = Vec::new();
    for batch in batches {
        let values = arrow::compute::cast(batch.column(value_index), &DataType::Float64)?;
        let values = values
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::Table(format!("'{VALUE_COLUMN}' column is not numeric")))?;
        let mut columns = Vec::with_capacity(axis_names.len());
        for (i, column) in batch.columns().iter().enumerate() {
            if i != value_index {
                columns.push(decode_column(column)?);
            }
        }
        for row in 0..batch.num_rows() {
            let coords = columns.iter().map(|c| c[row].clone()).collect();
            let value = (!values.is_null(row)).then(|| values.value(row));
            rows.push((coords, value));
        }
    }

    let axes = axis_names
        .iter()
        .enumerate()
        .map(|(i, name)| Axis::new(*name, rows.iter().map(|(coords, _)| coords[i].clone())))
        .collect();
    let mut array = AggregatedArray::new(axes)?;
    for (coords, value) in rows {
        let Some(value) = value else { continue };
        if let Some(cell) = array.index_of(&coords).and_then(|index| array.get_mut(&index)) {
            *cell = Some(value);
        }
    }
    Ok(array)
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
        .map_err(|e| Error::Table(format!("cannot create {}: {e}", path.display())))
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::Table(format!("cannot open {}: {e}", path.display())))
}

/// Write the filled cells of `array` as CSV with a header row.
///
/// # Errors
///
/// Returns error if the file cannot be written.
pub fn write_csv(array: &AggregatedArray, path: &Path) -> Result<()> {
    let batch = to_record_batch(array)?;
    let mut writer = WriterBuilder::new().with_header(true).build(create(path)?);
    writer.write(&batch)?;
    debug!(path = %path.display(), rows = batch.num_rows(), "csv written");
    Ok(())
}

/// Read a CSV table written by [`write_csv`].
///
/// Column types are inferred from the data.
///
/// # Errors
///
/// Returns error if the file cannot be read or has no value column.
pub fn read_csv(path: &Path) -> Result<AggregatedArray> {
    let mut file = open(path)?;
    let (schema, _) = Format::default().with_header(true).infer_schema(&mut file, None)?;
    file.rewind()?;
    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_header(true)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    from_record_batches(&schema, &batches)
}

/// Write the filled cells of `array` as Parquet.
///
/// # Errors
///
/// Returns error if the file cannot be written.
pub fn write_parquet(array: &AggregatedArray, path: &Path) -> Result<()> {
    let batch = to_record_batch(array)?;
    let mut writer = ArrowWriter::try_new(create(path)?, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    debug!(path = %path.display(), rows = batch.num_rows(), "parquet written");
    Ok(())
}

/// Read a Parquet table written by [`write_parquet`].
///
/// # Errors
///
/// Returns error if the file cannot be read or has no value column.
pub fn read_parquet(path: &Path) -> Result<AggregatedArray> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(open(path)?)?;
    let schema = Arc::clone(builder.schema());
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    from_record_batches(&schema, &batches)
}
