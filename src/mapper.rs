//! Row mapping: flat source row in, nested [`FactRecord`] out.
//!
//! Fields are visited in dimension-declaration order. A missing or empty
//! cell takes the attribute's default; without one, compound string
//! attributes become an empty string and everything else is a
//! [`MappingError`]. The mapper holds no state, so a single [`Schema`] can be
//! shared by any number of threads mapping rows concurrently.

use crate::{
    data::{Value, parse_typed_value},
    error::{CoercionError, MappingError, RowError},
    fact::{DimensionValue, FactRecord, SourceRow},
    schema::{DimensionShape, MappedField, Schema},
};

pub fn map_row(schema: &Schema, row: &SourceRow) -> Result<FactRecord, RowError> {
    let mut dimensions: Vec<DimensionValue> = schema
        .dimensions()
        .iter()
        .map(|dim| match &dim.shape {
            DimensionShape::Scalar { .. } => DimensionValue::Scalar(Value::String(String::new())),
            DimensionShape::Compound { attributes } => {
                DimensionValue::Compound(Vec::with_capacity(attributes.len()))
            }
        })
        .collect();

    for field in schema.fields() {
        let value = resolve_field(field, row)?;
        // Slots and fields both follow the dimension shapes, attributes in order.
        match &mut dimensions[field.target.dimension()] {
            DimensionValue::Scalar(slot) => *slot = value,
            DimensionValue::Compound(values) => values.push(value),
        }
    }
    Ok(FactRecord::new(schema, dimensions))
}

fn resolve_field(field: &MappedField, row: &SourceRow) -> Result<Value, RowError> {
    match row.get(&field.column).filter(|raw| !raw.is_empty()) {
        Some(raw) => parse_typed_value(raw, field.datatype).map_err(|source| {
            RowError::Coercion(CoercionError {
                path: field.path.clone(),
                datatype: field.datatype,
                source,
            })
        }),
        None => match &field.default {
            Some(default) => Ok(default.clone()),
            None if field.optional => Ok(Value::String(String::new())),
            None => Err(RowError::Mapping(MappingError {
                path: field.path.clone(),
                column: field.column.clone(),
            })),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelDocument;

    fn schema() -> Schema {
        ModelDocument::from_json_str(
            r#"{
            "dataset": {"name": "demo"},
            "mapping": {
                "to.name": {"column": "to"},
                "to.label": {"column": "to_label"},
                "time": {"column": "year"},
                "amount": {"column": "amount"}
            },
            "dimensions": {
                "to": {"type": "entity", "attributes": {
                    "name": {"datatype": "string", "default_value": "unknown"},
                    "label": {"datatype": "string"}
                }},
                "time": {"type": "value", "datatype": "date"},
                "amount": {"type": "measure", "datatype": "float"}
            }
        }"#,
        )
        .unwrap()
        .into_schema()
        .unwrap()
    }

    #[test]
    fn assembles_compound_attributes_in_declaration_order() {
        let row: SourceRow = [
            ("to", "acme"),
            ("to_label", "Acme Ltd"),
            ("year", "2009"),
            ("amount", "12.5"),
        ]
        .into_iter()
        .collect();
        let record = map_row(&schema(), &row).unwrap();
        assert_eq!(
            record.dimensions()[0],
            DimensionValue::Compound(vec![
                Value::String("acme".to_string()),
                Value::String("Acme Ltd".to_string()),
            ])
        );
        assert_eq!(record.dimensions()[2], DimensionValue::Scalar(Value::Float(12.5)));
    }

    #[test]
    fn mapping_order_does_not_reorder_attributes() {
        let schema = ModelDocument::from_json_str(
            r#"{
            "dataset": {"name": "demo"},
            "mapping": {
                "amount": {"column": "amount"},
                "to.label": {"column": "to_label"},
                "to.name": {"column": "to"}
            },
            "dimensions": {
                "amount": {"type": "measure", "datatype": "integer"},
                "to": {"type": "entity", "attributes": {
                    "name": {"datatype": "string"},
                    "label": {"datatype": "string"}
                }}
            }
        }"#,
        )
        .unwrap()
        .into_schema()
        .unwrap();
        let row: SourceRow = [("to", "acme"), ("to_label", "Acme Ltd"), ("amount", "3")]
            .into_iter()
            .collect();
        let record = map_row(&schema, &row).unwrap();
        assert_eq!(record.dimensions()[0], DimensionValue::Scalar(Value::Integer(3)));
        assert_eq!(
            record.dimensions()[1],
            DimensionValue::Compound(vec![
                Value::String("acme".to_string()),
                Value::String("Acme Ltd".to_string()),
            ])
        );
    }

    #[test]
    fn empty_cells_fall_back_to_defaults_and_blank_strings() {
        let row: SourceRow = [("to", ""), ("year", "2009"), ("amount", "1")]
            .into_iter()
            .collect();
        let record = map_row(&schema(), &row).unwrap();
        assert_eq!(
            record.dimensions()[0],
            DimensionValue::Compound(vec![
                Value::String("unknown".to_string()),
                Value::String(String::new()),
            ])
        );
    }

    #[test]
    fn malformed_dates_are_coercion_errors() {
        let row: SourceRow = [("year", "sometime"), ("amount", "1")].into_iter().collect();
        let err = map_row(&schema(), &row).unwrap_err();
        match err {
            RowError::Coercion(err) => assert_eq!(err.path, "time"),
            other => panic!("expected coercion error, got {other:?}"),
        }
    }
}
