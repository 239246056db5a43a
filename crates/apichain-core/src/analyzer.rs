//! The dependency analyzer.
//!
//! Scans every operation once, infers what each one consumes and produces,
//! and assembles the [`DependencyGraph`]. Analysis is total: an operation
//! whose schema cannot be read is logged and left out, everything else is
//! still analyzed.

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::error::SchemaError;
use crate::graph::DependencyGraph;
use crate::inputs::{extract_inputs, merge_related_resources, update_input_field_bindings};
use crate::outputs::{extract_outputs, ExtractionContext};
use crate::resource::{OperationMap, OperationNode, ResourceMap};
use crate::schema::{ApiSchema, Operation};

/// Builds the dependency graph of `api`.
pub fn analyze(api: &ApiSchema) -> DependencyGraph {
    let mut operations = OperationMap::new();
    let mut resources = ResourceMap::new();
    // Resources whose definition improved during the scan; their input
    // bindings are re-evaluated at the end.
    let mut updated = IndexSet::new();

    for result in api.operations() {
        let operation = match result {
            Ok(operation) => operation,
            Err(err) => {
                warn!(error = %err, "skipping operation that could not be read");
                continue;
            }
        };

        // Extract against a staged copy so a failing operation leaves no trace.
        let mut staged_resources = resources.clone();
        let mut staged_updated = updated.clone();
        let mut cx = ExtractionContext {
            api,
            resources: &mut staged_resources,
            updated: &mut staged_updated,
        };
        match extract_operation(&mut cx, &operation) {
            Ok(node) => {
                resources = staged_resources;
                updated = staged_updated;
                operations.insert(operation.label(), node);
            }
            Err(err) => {
                warn!(operation = %operation.label(), error = %err, "skipping operation in dependency analysis");
            }
        }
    }

    for name in &updated {
        update_input_field_bindings(name, &mut operations, &resources);
    }
    merge_related_resources(&mut operations, &resources);
    remove_orphans(&operations, &mut resources);

    debug!(
        operations = operations.len(),
        resources = resources.len(),
        "dependency analysis finished"
    );
    DependencyGraph { operations, resources }
}

fn extract_operation(cx: &mut ExtractionContext<'_>, operation: &Operation) -> Result<OperationNode, SchemaError> {
    let inputs = extract_inputs(cx, operation)?;
    let outputs = extract_outputs(cx, operation)?;
    Ok(OperationNode {
        method: operation.method.clone(),
        path: operation.path.clone(),
        inputs,
        outputs,
    })
}

/// Drops resources that no input or output refers to.
fn remove_orphans(operations: &OperationMap, resources: &mut ResourceMap) {
    resources.retain(|name, _| {
        let referenced = operations.values().any(|node| node.references(name));
        if !referenced {
            debug!(resource = %name, "removed orphan resource");
        }
        referenced
    });
}
