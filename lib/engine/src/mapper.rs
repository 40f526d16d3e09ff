//! Conversion of backend batches into RDF-typed solution tables.

use crate::errors::ChrontextError;
use chrontext_model::{format_date_time, xsd, RDFType, SolutionTable};
use chrono::DateTime;
use datafusion::arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    RecordBatch, StringArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use chrontext_query::VirtualizedQuery;
use oxrdf::{Literal, NamedNode, Term};
use std::collections::HashMap;

/// Converts a backend batch to a solution table, retyping columns with the
/// template parameter types declared for the virtualized query.
///
/// Timestamps are normalized to UTC `xsd:dateTime`. Columns with no declared
/// type (aggregate outputs, the grouping column) carry the natural XSD type
/// of their Arrow type.
pub fn batch_to_table(
    batch: &RecordBatch,
    query: &VirtualizedQuery,
) -> Result<SolutionTable, ChrontextError> {
    let declared = declared_types(query);
    let mut columns = Vec::new();
    for field in batch.schema_ref().fields() {
        columns.push(field.name().clone());
    }
    let mut table = SolutionTable::new(columns.clone());

    let mut converted: Vec<Vec<Option<Term>>> = Vec::with_capacity(batch.num_columns());
    for (index, field) in batch.schema_ref().fields().iter().enumerate() {
        let declared_type = declared.get(field.name().as_str());
        let (terms, datatype) =
            column_to_terms(batch.column(index).as_ref(), field.data_type(), declared_type)?;
        if let Some(datatype) = datatype {
            table.set_rdf_datatype(field.name().clone(), datatype);
        }
        converted.push(terms);
    }
    for row in 0..batch.num_rows() {
        table.push_row(converted.iter().map(|column| column[row].clone()).collect());
    }
    Ok(table)
}

fn declared_types(query: &VirtualizedQuery) -> HashMap<String, RDFType> {
    let mut out = HashMap::new();
    for basic in query.basics() {
        out.insert(basic.identifier_name().to_owned(), RDFType::string());
        for (column, variable) in &basic.column_mapping {
            if let Some(rdf_type) = basic.column_types.get(column) {
                out.insert(variable.as_str().to_owned(), rdf_type.clone());
            }
        }
    }
    out
}

fn column_to_terms(
    array: &dyn Array,
    data_type: &DataType,
    declared: Option<&RDFType>,
) -> Result<(Vec<Option<Term>>, Option<NamedNode>), ChrontextError> {
    let declared_literal = declared.and_then(|d| d.datatype()).cloned();
    let rows = array.len();
    let mut terms: Vec<Option<Term>> = Vec::with_capacity(rows);

    let mut push_lexical = |lexical: Option<String>,
                            natural: NamedNode,
                            terms: &mut Vec<Option<Term>>|
     -> NamedNode {
        let datatype = declared_literal.clone().unwrap_or(natural);
        if let Some(lexical) = lexical {
            terms.push(Some(
                Literal::new_typed_literal(lexical, datatype.clone()).into(),
            ));
        } else {
            terms.push(None);
        }
        datatype
    };

    let datatype = match data_type {
        DataType::Utf8 => {
            let array = downcast::<StringArray>(array)?;
            let mut datatype = declared_literal.clone().unwrap_or(xsd::STRING.into_owned());
            for i in 0..rows {
                let value = array.is_valid(i).then(|| array.value(i).to_owned());
                datatype = push_lexical(value, xsd::STRING.into_owned(), &mut terms);
            }
            datatype
        }
        DataType::Boolean => {
            let array = downcast::<BooleanArray>(array)?;
            let mut datatype = declared_literal.clone().unwrap_or(xsd::BOOLEAN.into_owned());
            for i in 0..rows {
                let value = array.is_valid(i).then(|| array.value(i).to_string());
                datatype = push_lexical(value, xsd::BOOLEAN.into_owned(), &mut terms);
            }
            datatype
        }
        DataType::Int64 => {
            let array = downcast::<Int64Array>(array)?;
            let mut datatype = declared_literal.clone().unwrap_or(xsd::INTEGER.into_owned());
            for i in 0..rows {
                let value = array.is_valid(i).then(|| array.value(i).to_string());
                datatype = push_lexical(value, xsd::INTEGER.into_owned(), &mut terms);
            }
            datatype
        }
        DataType::Int32 => {
            let array = downcast::<Int32Array>(array)?;
            let mut datatype = declared_literal.clone().unwrap_or(xsd::INTEGER.into_owned());
            for i in 0..rows {
                let value = array.is_valid(i).then(|| array.value(i).to_string());
                datatype = push_lexical(value, xsd::INTEGER.into_owned(), &mut terms);
            }
            datatype
        }
        DataType::Float64 => {
            let array = downcast::<Float64Array>(array)?;
            let mut datatype = declared_literal.clone().unwrap_or(xsd::DOUBLE.into_owned());
            for i in 0..rows {
                let value = array.is_valid(i).then(|| array.value(i).to_string());
                datatype = push_lexical(value, xsd::DOUBLE.into_owned(), &mut terms);
            }
            datatype
        }
        DataType::Float32 => {
            let array = downcast::<Float32Array>(array)?;
            let mut datatype = declared_literal.clone().unwrap_or(xsd::DOUBLE.into_owned());
            for i in 0..rows {
                let value = array.is_valid(i).then(|| array.value(i).to_string());
                datatype = push_lexical(value, xsd::DOUBLE.into_owned(), &mut terms);
            }
            datatype
        }
        DataType::Timestamp(unit, _) => {
            for i in 0..rows {
                let micros = timestamp_micros(array, unit, i)?;
                match micros {
                    Some(micros) => {
                        let instant = DateTime::from_timestamp_micros(micros)
                            .ok_or_else(|| {
                                ChrontextError::InternalError(format!(
                                    "timestamp out of range: {micros}"
                                ))
                            })?;
                        terms.push(Some(
                            Literal::new_typed_literal(
                                format_date_time(&instant),
                                xsd::DATE_TIME,
                            )
                            .into(),
                        ));
                    }
                    None => terms.push(None),
                }
            }
            xsd::DATE_TIME.into_owned()
        }
        other => {
            return Err(ChrontextError::InternalError(format!(
                "unmappable backend column type {other}"
            )))
        }
    };
    Ok((terms, Some(datatype)))
}

fn timestamp_micros(
    array: &dyn Array,
    unit: &TimeUnit,
    index: usize,
) -> Result<Option<i64>, ChrontextError> {
    if !array.is_valid(index) {
        return Ok(None);
    }
    let micros = match unit {
        TimeUnit::Second => downcast::<TimestampSecondArray>(array)?.value(index) * 1_000_000,
        TimeUnit::Millisecond => {
            downcast::<TimestampMillisecondArray>(array)?.value(index) * 1_000
        }
        TimeUnit::Microsecond => downcast::<TimestampMicrosecondArray>(array)?.value(index),
        TimeUnit::Nanosecond => {
            downcast::<TimestampNanosecondArray>(array)?.value(index) / 1_000
        }
    };
    Ok(Some(micros))
}

fn downcast<'a, T: 'static>(array: &'a dyn Array) -> Result<&'a T, ChrontextError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        ChrontextError::InternalError("backend column type mismatch".to_owned())
    })
}
