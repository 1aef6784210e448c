//! Schema validation.
//!
//! [`validate()`] walks a [`ModelDocument`] once, collecting every violation
//! it finds, and only hands out a [`Schema`] when the list is empty. All
//! attribute paths are resolved here so the mapper and the aggregator never
//! parse path strings per row.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use log::debug;

use crate::{
    data::{Value, parse_typed_value},
    error::{SchemaError, Violation},
    schema::{
        Attribute, DATASET_SUBJECT, DataType, Dataset, Dimension, DimensionKind, DimensionShape,
        FieldRef, Literal, MappedField, ModelDocument, NAME_ATTRIBUTE, Schema, ScopeProperty,
        Taxonomy, TaxonomyLevel, View, ViewFilter, ViewScope, ViewSpec,
    },
};

pub fn validate(doc: &ModelDocument) -> Result<Schema, SchemaError> {
    let mut violations = Vec::new();
    if doc.dataset.name.trim().is_empty() {
        violations.push(Violation::EmptyDatasetName);
    }

    let (mut dimensions, rejected) = build_dimensions(doc, &mut violations);
    let fields = build_fields(doc, &dimensions, &rejected, &mut violations);
    check_keys_and_measures(&dimensions, &mut violations);
    let taxonomies = build_taxonomies(&mut dimensions, &mut violations);

    let mut schema = Schema {
        dataset: Dataset {
            name: doc.dataset.name.clone(),
            label: doc.dataset.label.clone(),
            description: doc.dataset.description.clone(),
            currency: doc.dataset.currency.clone(),
        },
        dimensions,
        fields,
        taxonomies,
        views: Vec::new(),
    };
    let views = build_views(&doc.views, &schema, &mut violations);

    if !violations.is_empty() {
        debug!(
            "Model '{}' failed validation with {} violation(s)",
            doc.dataset.name,
            violations.len()
        );
        return Err(SchemaError {
            dataset: doc.dataset.name.clone(),
            violations,
        });
    }
    schema.views = views;
    Ok(schema)
}

fn parse_datatype(path: &str, raw: &str, violations: &mut Vec<Violation>) -> DataType {
    raw.parse().unwrap_or_else(|_| {
        violations.push(Violation::UnknownDatatype {
            path: path.to_string(),
            datatype: raw.to_string(),
        });
        DataType::String
    })
}

fn parse_default(
    path: &str,
    literal: Option<&Literal>,
    datatype: DataType,
    violations: &mut Vec<Violation>,
) -> Option<Value> {
    let raw = literal?.as_text();
    match parse_typed_value(&raw, datatype) {
        Ok(value) => Some(value),
        Err(err) => {
            violations.push(Violation::InvalidDefault {
                path: path.to_string(),
                value: raw,
                reason: err.to_string(),
            });
            None
        }
    }
}

/// Returns the accepted dimensions plus the names of declarations that were
/// rejected outright, so later checks do not report them twice.
fn build_dimensions(
    doc: &ModelDocument,
    violations: &mut Vec<Violation>,
) -> (Vec<Dimension>, HashSet<String>) {
    let mut dimensions: Vec<Dimension> = Vec::with_capacity(doc.dimensions.len());
    let mut rejected = HashSet::new();
    let mut seen = HashSet::new();

    for (name, spec) in &doc.dimensions {
        if !seen.insert(name.as_str()) {
            violations.push(Violation::DuplicateDimension(name.clone()));
            continue;
        }
        let Some(kind) = DimensionKind::parse(&spec.kind) else {
            violations.push(Violation::UnknownDimensionKind {
                dimension: name.clone(),
                kind: spec.kind.clone(),
            });
            rejected.insert(name.clone());
            continue;
        };

        let shape = if kind.is_compound() {
            if spec.attributes.is_empty() {
                violations.push(Violation::MissingAttributes(name.clone()));
            } else if !spec.attributes.iter().any(|(attr, _)| attr == NAME_ATTRIBUTE) {
                violations.push(Violation::MissingNameAttribute(name.clone()));
            }
            let attributes = spec
                .attributes
                .iter()
                .map(|(attr, attr_spec)| {
                    let path = format!("{name}.{attr}");
                    let datatype = parse_datatype(&path, &attr_spec.datatype, violations);
                    let default = parse_default(
                        &path,
                        attr_spec.default_value.as_ref(),
                        datatype,
                        violations,
                    );
                    Attribute {
                        name: attr.clone(),
                        datatype,
                        default,
                    }
                })
                .collect();
            DimensionShape::Compound { attributes }
        } else {
            let datatype = match &spec.datatype {
                Some(raw) => parse_datatype(name, raw, violations),
                None => {
                    violations.push(Violation::MissingDatatype(name.clone()));
                    DataType::String
                }
            };
            let default = parse_default(name, spec.default_value.as_ref(), datatype, violations);
            DimensionShape::Scalar { datatype, default }
        };

        let level = spec.level.as_ref().and_then(|literal| {
            let raw = literal.as_text();
            match raw.trim().parse::<u32>() {
                Ok(level) => Some(level),
                Err(_) => {
                    violations.push(Violation::InvalidLevel {
                        dimension: name.clone(),
                        level: raw,
                    });
                    None
                }
            }
        });
        // Classifiers without an explicit taxonomy form their own.
        let taxonomy = match kind {
            DimensionKind::Classifier => {
                Some(spec.taxonomy.clone().unwrap_or_else(|| name.clone()))
            }
            _ => spec.taxonomy.clone(),
        };

        dimensions.push(Dimension {
            name: name.clone(),
            kind,
            label: spec.label.clone(),
            description: spec.description.clone(),
            facet: spec.facet,
            key: spec.key,
            taxonomy,
            level,
            change_date: spec.change_date.clone(),
            shape,
        });
    }
    (dimensions, rejected)
}

fn build_fields(
    doc: &ModelDocument,
    dimensions: &[Dimension],
    rejected: &HashSet<String>,
    violations: &mut Vec<Violation>,
) -> Vec<MappedField> {
    let mut entries: HashMap<&str, Vec<&str>> = HashMap::new();
    for (path, entry) in &doc.mapping {
        if entry.column.trim().is_empty() {
            violations.push(Violation::EmptyMappingColumn(path.clone()));
        }
        entries
            .entry(path.as_str())
            .or_default()
            .push(entry.column.as_str());
    }

    let mut fields = Vec::new();
    let mut expected = HashSet::new();
    for (index, dim) in dimensions.iter().enumerate() {
        let targets: Vec<(String, FieldRef, DataType, Option<Value>, bool)> = match &dim.shape {
            DimensionShape::Scalar { datatype, default } => vec![(
                dim.name.clone(),
                FieldRef::Scalar { dimension: index },
                *datatype,
                default.clone(),
                false,
            )],
            DimensionShape::Compound { attributes } => attributes
                .iter()
                .enumerate()
                .map(|(attribute, attr)| {
                    (
                        format!("{}.{}", dim.name, attr.name),
                        FieldRef::Attribute {
                            dimension: index,
                            attribute,
                        },
                        attr.datatype,
                        attr.default.clone(),
                        attr.datatype == DataType::String,
                    )
                })
                .collect(),
        };

        for (path, target, datatype, default, optional) in targets {
            match entries.get(path.as_str()).map(Vec::as_slice) {
                None | Some([]) => violations.push(Violation::UnmappedAttribute(path.clone())),
                Some([column]) => fields.push(MappedField {
                    path: path.clone(),
                    column: (*column).to_string(),
                    target,
                    datatype,
                    default,
                    optional,
                }),
                Some(_) => violations.push(Violation::DuplicateMapping(path.clone())),
            }
            expected.insert(path);
        }
    }

    let mut reported = HashSet::new();
    for (path, _) in &doc.mapping {
        let head = path.split('.').next().unwrap_or(path);
        if expected.contains(path) || rejected.contains(head) {
            continue;
        }
        if reported.insert(path.as_str()) {
            violations.push(Violation::UnknownMappingTarget(path.clone()));
        }
    }
    fields
}

fn check_keys_and_measures(dimensions: &[Dimension], violations: &mut Vec<Violation>) {
    for dim in dimensions {
        if dim.key {
            let datatype = match &dim.shape {
                DimensionShape::Scalar { datatype, .. } => Some(*datatype),
                DimensionShape::Compound { .. } => {
                    dim.attribute(NAME_ATTRIBUTE).map(|attr| attr.datatype)
                }
            };
            if let Some(datatype) = datatype
                && datatype != DataType::String
            {
                violations.push(Violation::KeyNotString {
                    dimension: dim.name.clone(),
                    datatype,
                });
            }
        }
        if dim.kind == DimensionKind::Measure
            && let Some(datatype) = dim.scalar_datatype()
            && !datatype.is_numeric()
        {
            violations.push(Violation::MeasureNotNumeric {
                dimension: dim.name.clone(),
                datatype,
            });
        }
    }
}

/// Groups classifiers by taxonomy. Declared levels must be distinct; a
/// classifier without one takes the lowest level still free, in declaration
/// order, and the resolved level is written back onto the dimension.
fn build_taxonomies(dimensions: &mut [Dimension], violations: &mut Vec<Violation>) -> Vec<Taxonomy> {
    let mut taxonomies: Vec<Taxonomy> = Vec::new();
    let mut undeclared: Vec<(usize, usize)> = Vec::new();
    for (index, dim) in dimensions.iter().enumerate() {
        if dim.kind != DimensionKind::Classifier {
            continue;
        }
        let Some(name) = &dim.taxonomy else {
            continue;
        };
        let position = match taxonomies.iter().position(|tax| &tax.name == name) {
            Some(position) => position,
            None => {
                taxonomies.push(Taxonomy {
                    name: name.clone(),
                    levels: Vec::new(),
                });
                taxonomies.len() - 1
            }
        };
        match dim.level {
            Some(level) => taxonomies[position].levels.push(TaxonomyLevel {
                level,
                dimension: index,
            }),
            None => undeclared.push((position, index)),
        }
    }

    for taxonomy in &mut taxonomies {
        taxonomy.levels.sort_by_key(|entry| (entry.level, entry.dimension));
        for (level, group) in &taxonomy.levels.iter().chunk_by(|entry| entry.level) {
            let sharing: Vec<&str> = group
                .map(|entry| dimensions[entry.dimension].name.as_str())
                .collect();
            if sharing.len() > 1 {
                violations.push(Violation::DuplicateTaxonomyLevel {
                    taxonomy: taxonomy.name.clone(),
                    level,
                    dimensions: sharing.join(", "),
                });
            }
        }
    }

    for (position, index) in undeclared {
        let taxonomy = &mut taxonomies[position];
        let level = (1..)
            .find(|candidate| taxonomy.levels.iter().all(|entry| entry.level != *candidate))
            .unwrap_or(1);
        taxonomy.levels.push(TaxonomyLevel {
            level,
            dimension: index,
        });
        dimensions[index].level = Some(level);
    }
    for taxonomy in &mut taxonomies {
        taxonomy.levels.sort_by_key(|entry| entry.level);
    }
    taxonomies
}

fn build_views(specs: &[ViewSpec], schema: &Schema, violations: &mut Vec<Violation>) -> Vec<View> {
    let mut views = Vec::with_capacity(specs.len());
    let mut seen = HashSet::new();

    for spec in specs {
        let before = violations.len();
        let Some(scope) = ViewScope::parse(&spec.entity) else {
            violations.push(Violation::UnknownViewScope {
                view: spec.name.clone(),
                entity: spec.entity.clone(),
            });
            continue;
        };

        let subject = resolve_subject(spec, scope, schema, violations);
        let breakdown = schema.resolve_field(&spec.breakdown);
        if breakdown.is_none() {
            violations.push(Violation::UnknownViewBreakdown {
                view: spec.name.clone(),
                breakdown: spec.breakdown.clone(),
            });
        }
        let filters: Vec<ViewFilter> = spec
            .filters
            .iter()
            .filter_map(|(key, literal)| {
                let filter = resolve_view_filter(key, literal, scope, subject, schema);
                if filter.is_none() {
                    violations.push(Violation::UnknownViewFilter {
                        view: spec.name.clone(),
                        key: key.clone(),
                    });
                }
                filter
            })
            .collect();

        if !seen.insert((scope, spec.dimension.as_str(), spec.name.as_str())) {
            violations.push(Violation::DuplicateView {
                entity: spec.entity.clone(),
                dimension: spec.dimension.clone(),
                name: spec.name.clone(),
            });
        }

        if let Some(breakdown) = breakdown
            && violations.len() == before
        {
            views.push(View {
                scope,
                name: spec.name.clone(),
                label: spec.label.clone(),
                subject,
                dimension: spec.dimension.clone(),
                breakdown,
                breakdown_name: spec.breakdown.clone(),
                filters,
            });
        }
    }
    views
}

fn resolve_subject(
    spec: &ViewSpec,
    scope: ViewScope,
    schema: &Schema,
    violations: &mut Vec<Violation>,
) -> Option<usize> {
    if spec.dimension == DATASET_SUBJECT {
        if scope != ViewScope::Dataset {
            violations.push(Violation::ViewScopeMismatch {
                view: spec.name.clone(),
                entity: spec.entity.clone(),
                dimension: spec.dimension.clone(),
            });
        }
        return None;
    }
    let Some(index) = schema.dimension_index(&spec.dimension) else {
        violations.push(Violation::UnknownViewDimension {
            view: spec.name.clone(),
            dimension: spec.dimension.clone(),
        });
        return None;
    };
    let kind = schema.dimensions[index].kind;
    let compatible = match scope {
        ViewScope::Dataset => false,
        ViewScope::Classifier => kind == DimensionKind::Classifier,
        ViewScope::Entity => kind == DimensionKind::Entity,
    };
    if !compatible {
        violations.push(Violation::ViewScopeMismatch {
            view: spec.name.clone(),
            entity: spec.entity.clone(),
            dimension: spec.dimension.clone(),
        });
    }
    Some(index)
}

/// Scope properties win over fact paths: `name` in a dataset view is the
/// dataset's name, `taxonomy` in a classifier view is the subject's taxonomy.
fn resolve_view_filter(
    key: &str,
    literal: &Literal,
    scope: ViewScope,
    subject: Option<usize>,
    schema: &Schema,
) -> Option<ViewFilter> {
    let expected = literal.as_text();
    let property = match (scope, key) {
        (ViewScope::Dataset, "name") => Some(ScopeProperty::DatasetName),
        (ViewScope::Dataset, "label") => Some(ScopeProperty::DatasetLabel),
        (ViewScope::Dataset, "currency") => Some(ScopeProperty::DatasetCurrency),
        (ViewScope::Classifier, "taxonomy") => Some(ScopeProperty::Taxonomy),
        _ => None,
    };
    if let Some(property) = property {
        return Some(ViewFilter::Scope {
            key: key.to_string(),
            property,
            expected,
        });
    }

    let subject_field = subject.and_then(|index| {
        let dim = &schema.dimensions[index];
        dim.attribute_index(key).map(|attribute| FieldRef::Attribute {
            dimension: index,
            attribute,
        })
    });
    let field = subject_field.or_else(|| schema.resolve_field(key))?;
    Some(ViewFilter::Fact {
        key: key.to_string(),
        field,
        expected,
    })
}
