/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Descriptions and discovery queries.
//!
//! Agents describe themselves and their services with an [`Instance`]: a
//! record of typed attribute values conforming to a [`DataModel`]. Discovery
//! runs a [`QueryModel`] — a predicate over instances — against the broker's
//! registered descriptions. The rest of the runtime only relies on
//! [`QueryModel::check`] being a pure predicate.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Error raised while building instances or queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A required attribute has no value.
    MissingAttribute(String),
    /// A value's type does not match the attribute declaration.
    TypeMismatch(String),
    /// A value or constraint names an attribute absent from the data model.
    UnknownAttribute(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAttribute(name) => write!(f, "Missing required attribute: {name}"),
            Self::TypeMismatch(name) => write!(f, "Type mismatch for attribute: {name}"),
            Self::UnknownAttribute(name) => {
                write!(f, "Attribute does not exist in data model: {name}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// A geographic coordinate, longitude/latitude in degrees.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Location {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

impl Location {
    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// An attribute value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Value {
    /// UTF-8 text.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// Geographic coordinate.
    Location(Location),
}

impl Value {
    const fn attribute_type(&self) -> AttributeType {
        match self {
            Self::Str(_) => AttributeType::Str,
            Self::Int(_) => AttributeType::Int,
            Self::Float(_) => AttributeType::Float,
            Self::Bool(_) => AttributeType::Bool,
            Self::Location(_) => AttributeType::Location,
        }
    }

    /// Ordering used by range and relation constraints. Values of different
    /// types never compare.
    fn partial_cmp_value(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// The type of an attribute declaration.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeType {
    /// UTF-8 text.
    Str,
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// Boolean flag.
    Bool,
    /// Geographic coordinate.
    Location,
}

/// A single attribute declaration in a data model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attribute {
    /// Attribute name, unique within its data model.
    pub name: String,
    /// Declared value type.
    pub attribute_type: AttributeType,
    /// Whether every instance must carry a value for this attribute.
    pub required: bool,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attribute {
    /// Creates an attribute declaration without a description.
    #[must_use]
    pub fn new(name: impl Into<String>, attribute_type: AttributeType, required: bool) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            required,
            description: None,
        }
    }

    /// Creates an attribute declaration with a description.
    #[must_use]
    pub fn with_description(
        name: impl Into<String>,
        attribute_type: AttributeType,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            required,
            description: Some(description.into()),
        }
    }
}

/// A named collection of attribute declarations.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DataModel {
    /// Model name.
    pub name: String,
    /// Attribute declarations.
    pub attributes: Vec<Attribute>,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DataModel {
    /// Creates a data model from its attribute declarations.
    #[must_use]
    pub fn new(name: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            name: name.into(),
            attributes,
            description: None,
        }
    }

    fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A description: attribute values conforming to a data model.
///
/// Construction validates the values against the model, so an `Instance`
/// in circulation is always well formed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Instance {
    /// The data model the values conform to.
    pub model: DataModel,
    /// Attribute name to value.
    pub values: HashMap<String, Value>,
}

impl Instance {
    /// Builds an instance, validating `values` against `model`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when a required attribute is missing, a value
    /// has the wrong type, or a value names an undeclared attribute.
    pub fn new(model: DataModel, values: HashMap<String, Value>) -> Result<Self, SchemaError> {
        for attribute in &model.attributes {
            match values.get(&attribute.name) {
                Some(value) => {
                    if value.attribute_type() != attribute.attribute_type {
                        return Err(SchemaError::TypeMismatch(attribute.name.clone()));
                    }
                }
                None => {
                    if attribute.required {
                        return Err(SchemaError::MissingAttribute(attribute.name.clone()));
                    }
                }
            }
        }
        for name in values.keys() {
            if model.attribute(name).is_none() {
                return Err(SchemaError::UnknownAttribute(name.clone()));
            }
        }
        Ok(Self { model, values })
    }

    /// The value stored under `name`, if any.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Relation operators for [`ConstraintType::Relation`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationOp {
    /// Equal.
    Eq,
    /// Not equal.
    NotEq,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    LtEq,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    GtEq,
}

/// Set operators for [`ConstraintType::Set`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOp {
    /// The value must be one of the listed values.
    In,
    /// The value must not be one of the listed values.
    NotIn,
}

/// The predicate applied to a single attribute value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ConstraintType {
    /// Value within `[lower, upper]`, bounds included.
    Range {
        /// Lower bound.
        lower: Value,
        /// Upper bound.
        upper: Value,
    },
    /// Value compared against a reference value.
    Relation {
        /// Comparison operator.
        op: RelationOp,
        /// Reference value.
        value: Value,
    },
    /// Value membership in a set.
    Set {
        /// Membership operator.
        op: SetOp,
        /// Candidate values.
        values: Vec<Value>,
    },
}

impl ConstraintType {
    fn check(&self, value: &Value) -> bool {
        use std::cmp::Ordering;
        match self {
            Self::Range { lower, upper } => matches!(
                (value.partial_cmp_value(lower), value.partial_cmp_value(upper)),
                (
                    Some(Ordering::Greater | Ordering::Equal),
                    Some(Ordering::Less | Ordering::Equal)
                )
            ),
            Self::Relation { op, value: rhs } => match value.partial_cmp_value(rhs) {
                Some(ord) => match op {
                    RelationOp::Eq => ord == Ordering::Equal,
                    RelationOp::NotEq => ord != Ordering::Equal,
                    RelationOp::Lt => ord == Ordering::Less,
                    RelationOp::LtEq => ord != Ordering::Greater,
                    RelationOp::Gt => ord == Ordering::Greater,
                    RelationOp::GtEq => ord != Ordering::Less,
                },
                None => false,
            },
            Self::Set { op, values } => {
                let found = values.contains(value);
                match op {
                    SetOp::In => found,
                    SetOp::NotIn => !found,
                }
            }
        }
    }
}

/// A predicate on one named attribute.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Constraint {
    /// Attribute the predicate applies to.
    pub attribute: String,
    /// The predicate itself.
    pub constraint: ConstraintType,
}

impl Constraint {
    /// Creates a constraint on the named attribute.
    #[must_use]
    pub fn new(attribute: impl Into<String>, constraint: ConstraintType) -> Self {
        Self {
            attribute: attribute.into(),
            constraint,
        }
    }

    /// Evaluates the constraint against an instance. An instance without the
    /// named attribute never matches.
    #[must_use]
    pub fn check(&self, instance: &Instance) -> bool {
        instance
            .value(&self.attribute)
            .is_some_and(|value| self.constraint.check(value))
    }
}

/// A boolean combination of constraints.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ConstraintExpr {
    /// A single attribute constraint.
    Constraint(Constraint),
    /// All sub-expressions must hold.
    And(Vec<ConstraintExpr>),
    /// At least one sub-expression must hold.
    Or(Vec<ConstraintExpr>),
    /// The sub-expression must not hold.
    Not(Box<ConstraintExpr>),
}

impl ConstraintExpr {
    fn check(&self, instance: &Instance) -> bool {
        match self {
            Self::Constraint(c) => c.check(instance),
            Self::And(exprs) => exprs.iter().all(|e| e.check(instance)),
            Self::Or(exprs) => exprs.iter().any(|e| e.check(instance)),
            Self::Not(expr) => !expr.check(instance),
        }
    }

    fn attributes(&self, out: &mut Vec<String>) {
        match self {
            Self::Constraint(c) => out.push(c.attribute.clone()),
            Self::And(exprs) | Self::Or(exprs) => {
                for e in exprs {
                    e.attributes(out);
                }
            }
            Self::Not(expr) => expr.attributes(out),
        }
    }
}

/// A discovery query: a conjunction of constraint expressions, optionally
/// pinned to a data model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueryModel {
    /// Top-level constraint expressions; all must hold.
    pub constraints: Vec<ConstraintExpr>,
    /// Optional data model the constraints were validated against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<DataModel>,
}

impl QueryModel {
    /// Creates a query from constraint expressions.
    #[must_use]
    pub fn new(constraints: Vec<ConstraintExpr>) -> Self {
        Self {
            constraints,
            model: None,
        }
    }

    /// Creates a query validated against a data model.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownAttribute`] when a constraint names an
    /// attribute the model does not declare.
    pub fn with_model(
        constraints: Vec<ConstraintExpr>,
        model: DataModel,
    ) -> Result<Self, SchemaError> {
        let mut names = Vec::new();
        for expr in &constraints {
            expr.attributes(&mut names);
        }
        for name in names {
            if model.attribute(&name).is_none() {
                return Err(SchemaError::UnknownAttribute(name));
            }
        }
        Ok(Self {
            constraints,
            model: Some(model),
        })
    }

    /// Evaluates the query against an instance.
    #[must_use]
    pub fn check(&self, instance: &Instance) -> bool {
        self.constraints.iter().all(|e| e.check(instance))
    }
}
