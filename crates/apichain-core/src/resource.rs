//! Resource model: inferred domain entities and the slots binding operations
//! to them.
//!
//! Slots refer to resources by name. The resource table owned by the
//! [`DependencyGraph`](crate::graph::DependencyGraph) is the single source
//! of truth, so upgrading a resource never requires touching the slots that
//! point at it.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::location::ParameterLocation;

/// Resource table keyed by resource name, in discovery order.
pub type ResourceMap = IndexMap<String, ResourceDefinition>;

/// Operation nodes keyed by operation label (`"METHOD /path"`).
pub type OperationMap = IndexMap<String, OperationNode>;

/// How trustworthy a resource definition is.
///
/// Ordered from least to most reliable. A definition is only ever replaced
/// by one with a strictly higher source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionSource {
    /// Declared by a schema that lists no properties.
    SchemaWithoutProperties,
    /// Guessed from a parameter name.
    ParameterInference,
    /// Declared by a schema with real properties.
    SchemaWithProperties,
}

/// Whether a slot holds a single resource or a collection of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cardinality {
    One,
    Many,
}

/// A named candidate domain entity, e.g. `User`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
    /// Candidate identifying fields, in declaration order.
    pub fields: Vec<String>,
    /// JSON types declared for each field.
    pub types: IndexMap<String, BTreeSet<String>>,
    pub source: DefinitionSource,
}

impl ResourceDefinition {
    pub fn without_properties(name: impl Into<String>) -> Self {
        ResourceDefinition {
            name: name.into(),
            fields: Vec::new(),
            types: IndexMap::new(),
            source: DefinitionSource::SchemaWithoutProperties,
        }
    }

    /// Placeholder for a resource known only by name.
    pub fn placeholder(name: impl Into<String>) -> Self {
        ResourceDefinition {
            name: name.into(),
            fields: Vec::new(),
            types: IndexMap::new(),
            source: DefinitionSource::ParameterInference,
        }
    }

    /// Placeholder whose only field is the parameter that suggested it.
    pub fn inferred_from_parameter(name: impl Into<String>, parameter: &str) -> Self {
        ResourceDefinition {
            name: name.into(),
            fields: vec![parameter.to_string()],
            types: IndexMap::new(),
            source: DefinitionSource::ParameterInference,
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|known| known == field)
    }

    /// Replaces fields, types and source when `source` is strictly better.
    ///
    /// Returns `true` if the definition changed.
    pub fn upgrade(
        &mut self,
        source: DefinitionSource,
        fields: Vec<String>,
        types: IndexMap<String, BTreeSet<String>>,
    ) -> bool {
        if self.source >= source {
            return false;
        }
        self.source = source;
        self.fields = fields;
        self.types = types;
        true
    }
}

/// Binds one operation input to a resource field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    /// Name of the resource in the resource table.
    pub resource: String,
    /// Field of the resource the input carries; `None` means the whole resource.
    pub resource_field: Option<String>,
    pub parameter_name: String,
    pub parameter_location: ParameterLocation,
}

impl InputSlot {
    /// Parameter name of a whole-resource element in an array request body.
    pub const ARRAY_ITEM: &'static str = "0";

    /// A whole `resource` sent as the element of an array request body.
    pub fn array_item(resource: impl Into<String>) -> Self {
        InputSlot {
            resource: resource.into(),
            resource_field: None,
            parameter_name: Self::ARRAY_ITEM.to_string(),
            parameter_location: ParameterLocation::Body,
        }
    }

    pub fn is_array_item(&self) -> bool {
        self.parameter_location == ParameterLocation::Body && self.resource_field.is_none()
    }
}

/// Binds one successful response of an operation to a resource it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlot {
    /// Name of the resource in the resource table.
    pub resource: String,
    /// JSON pointer to the resource inside the response body.
    pub pointer: String,
    pub cardinality: Cardinality,
    pub status_code: String,
}

/// An API operation with what it needs and what it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationNode {
    pub method: String,
    pub path: String,
    pub inputs: Vec<InputSlot>,
    pub outputs: Vec<OutputSlot>,
}

impl OperationNode {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        OperationNode {
            method: method.into(),
            path: path.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }

    pub fn references(&self, resource: &str) -> bool {
        self.inputs.iter().any(|slot| slot.resource == resource)
            || self.outputs.iter().any(|slot| slot.resource == resource)
    }
}
