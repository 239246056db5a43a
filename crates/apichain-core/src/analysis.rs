//! Per-schema cache of dependency inference results.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::analyzer::analyze;
use crate::graph::DependencyGraph;
use crate::layers::compute_dependency_layers;
use crate::links;
use crate::schema::ApiSchema;

/// Switches for schema-based inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Infer producer -> consumer dependencies and inject them as links.
    pub dependency_analysis: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            dependency_analysis: true,
        }
    }
}

/// An [`ApiSchema`] together with its lazily computed dependency graph and
/// layers.
///
/// The graph is computed once, from the schema as it was before any link
/// injection, and is shared read-only afterwards.
#[derive(Debug)]
pub struct SchemaAnalysis {
    schema: ApiSchema,
    graph: OnceLock<DependencyGraph>,
    layers: OnceLock<Option<Vec<Vec<String>>>>,
    links_injected: bool,
}

impl SchemaAnalysis {
    pub fn new(schema: ApiSchema) -> Self {
        Self {
            schema,
            graph: OnceLock::new(),
            layers: OnceLock::new(),
            links_injected: false,
        }
    }

    pub fn schema(&self) -> &ApiSchema {
        &self.schema
    }

    pub fn into_schema(self) -> ApiSchema {
        self.schema
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        self.graph.get_or_init(|| analyze(&self.schema))
    }

    pub fn dependency_layers(&self) -> Option<&[Vec<String>]> {
        self.layers
            .get_or_init(|| compute_dependency_layers(self.dependency_graph()))
            .as_deref()
    }

    pub fn links_injected(&self) -> bool {
        self.links_injected
    }

    /// Whether [`inject_links`](Self::inject_links) still has work to do
    /// under `config`.
    pub fn should_inject_links(&self, config: &InferenceConfig) -> bool {
        config.dependency_analysis && !self.links_injected
    }

    /// Writes inferred links into the schema.
    ///
    /// Runs at most once per instance; later calls return 0.
    pub fn inject_links(&mut self) -> usize {
        if self.links_injected {
            return 0;
        }
        self.links_injected = true;
        let graph = self.graph.get_or_init(|| analyze(&self.schema));
        links::inject_links(&mut self.schema, graph)
    }
}
