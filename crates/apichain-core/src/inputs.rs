//! Input extraction: which resources an operation consumes through its
//! parameters and request body.

use indexmap::IndexSet;
use serde_json::Value;
use tracing::debug;

use crate::error::SchemaError;
use crate::location::ParameterLocation;
use crate::naming;
use crate::outputs::{find_resource_in_responses, ExtractionContext};
use crate::resource::{
    DefinitionSource, InputSlot, OperationMap, OutputSlot, ResourceDefinition, ResourceMap,
};
use crate::schema::{Operation, RequestBody};
use crate::unwrap::{json_types, resource_name_from_ref};

/// Body properties too generic to identify a resource on their own.
const GENERIC_FIELD_NAMES: [&str; 5] = ["body", "text", "content", "message", "description"];

/// Input slots for every parameter and JSON body property of `operation`
/// that refers to a resource.
///
/// Placeholder resources are created for parameters whose resource has not
/// been seen yet; later schemas upgrade them in place.
pub fn extract_inputs(
    cx: &mut ExtractionContext<'_>,
    operation: &Operation,
) -> Result<Vec<InputSlot>, SchemaError> {
    let mut inputs = Vec::new();
    let mut known_dependencies = IndexSet::new();

    for parameter in &operation.parameters {
        if let Some(slot) = resolve_parameter_dependency(cx, operation, &parameter.name, parameter.location)? {
            let schema_backed = cx
                .resources
                .get(&slot.resource)
                .is_some_and(|resource| resource.source >= DefinitionSource::SchemaWithProperties);
            if schema_backed {
                known_dependencies.insert(slot.resource.clone());
            }
            inputs.push(slot);
        }
    }

    if let Some(body) = operation.body.as_ref().filter(|body| body.is_json()) {
        inputs.extend(resolve_body_dependencies(cx, operation, body, &known_dependencies)?);
    }

    Ok(inputs)
}

fn resolve_parameter_dependency(
    cx: &mut ExtractionContext<'_>,
    operation: &Operation,
    parameter: &str,
    location: ParameterLocation,
) -> Result<Option<InputSlot>, SchemaError> {
    let Some(resource_name) = naming::from_parameter(parameter, &operation.path) else {
        return Ok(None);
    };

    let mut found = cx
        .resources
        .get(&resource_name)
        .is_some_and(|resource| resource.source >= DefinitionSource::SchemaWithProperties);
    if !found {
        // Look for the real schema in this operation's own responses.
        found = find_resource_in_responses(cx, operation, &resource_name)?;
    }

    let field = match (found, cx.resources.get_mut(&resource_name)) {
        (true, Some(resource)) => naming::find_matching_field(parameter, &resource_name, &resource.fields)
            .unwrap_or("id")
            .to_string(),
        (_, Some(resource)) => {
            // Only less informative definitions exist: refresh the placeholder.
            resource.fields = vec![parameter.to_string()];
            resource.source = DefinitionSource::ParameterInference;
            cx.updated.insert(resource_name.clone());
            parameter.to_string()
        }
        (_, None) => {
            debug!(resource = %resource_name, parameter, "created placeholder resource");
            cx.resources.insert(
                resource_name.clone(),
                ResourceDefinition::inferred_from_parameter(resource_name.clone(), parameter),
            );
            parameter.to_string()
        }
    };

    Ok(Some(InputSlot {
        resource: resource_name,
        resource_field: Some(field),
        parameter_name: parameter.to_string(),
        parameter_location: location,
    }))
}

fn resolve_body_dependencies(
    cx: &mut ExtractionContext<'_>,
    operation: &Operation,
    body: &RequestBody,
    known_dependencies: &IndexSet<String>,
) -> Result<Vec<InputSlot>, SchemaError> {
    let api = cx.api;
    let resolved = api.resolve(&body.schema)?;
    let mut inputs = Vec::new();

    // An array of referenced schemas carries whole resources.
    if let Some(reference) = resolved
        .get("items")
        .and_then(|items| items.get("$ref"))
        .and_then(Value::as_str)
    {
        let resource_name = resource_name_from_ref(reference).to_string();
        if !cx.resources.contains_key(&resource_name) {
            debug!(resource = %resource_name, "created placeholder resource for array body");
            cx.resources
                .insert(resource_name.clone(), ResourceDefinition::placeholder(resource_name.clone()));
        }
        inputs.push(InputSlot::array_item(resource_name));
    }

    let Some(properties) = resolved.get("properties").and_then(Value::as_object) else {
        return Ok(inputs);
    };
    let required: Vec<&str> = resolved
        .get("required")
        .and_then(Value::as_array)
        .map(|required| required.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (property, subschema) in properties {
        if let Some(resource_name) = naming::from_parameter(property, &operation.path) {
            let field = match cx.resources.get(&resource_name) {
                Some(resource) => naming::find_matching_field(property, &resource_name, &resource.fields)
                    .unwrap_or("id")
                    .to_string(),
                None => {
                    cx.resources.insert(
                        resource_name.clone(),
                        ResourceDefinition::inferred_from_parameter(resource_name.clone(), property),
                    );
                    property.clone()
                }
            };
            inputs.push(InputSlot {
                resource: resource_name,
                resource_field: Some(field),
                parameter_name: property.clone(),
                parameter_location: ParameterLocation::Body,
            });
            continue;
        }

        if GENERIC_FIELD_NAMES.contains(&property.as_str()) || !required.contains(&property.as_str()) {
            continue;
        }

        // Bind to the single known resource that has this field, if any.
        let mut candidates = known_dependencies.iter().filter_map(|name| {
            cx.resources
                .get(name)
                .filter(|resource| resource.has_field(property))
        });
        let (Some(resource), None) = (candidates.next(), candidates.next()) else {
            continue;
        };
        let property_types = json_types(api.resolve(subschema).unwrap_or(subschema));
        let compatible = resource
            .types
            .get(property)
            .is_some_and(|types| !types.is_disjoint(&property_types));
        if !compatible {
            continue;
        }
        inputs.push(InputSlot {
            resource: resource.name.clone(),
            resource_field: Some(property.clone()),
            parameter_name: property.clone(),
            parameter_location: ParameterLocation::Body,
        });
    }
    Ok(inputs)
}

/// Re-matches every input slot of `resource_name` against its current fields.
///
/// A parameter seen before the authoritative schema may be bound to a field
/// of the old placeholder (`userId` instead of `id`).
pub fn update_input_field_bindings(resource_name: &str, operations: &mut OperationMap, resources: &ResourceMap) {
    let Some(resource) = resources.get(resource_name) else {
        return;
    };
    for operation in operations.values_mut() {
        for slot in operation
            .inputs
            .iter_mut()
            .filter(|slot| slot.resource == resource_name && !slot.is_array_item())
        {
            if let Some(field) = naming::find_matching_field(&slot.parameter_name, resource_name, &resource.fields) {
                slot.resource_field = Some(field.to_string());
            }
        }
    }
}

/// Rebinds parameter-inferred inputs to schema-backed resources produced by
/// a REST sibling (`POST /posts` -> `GET /posts/{postId}`).
pub fn merge_related_resources(operations: &mut OperationMap, resources: &ResourceMap) {
    for (producer, consumer) in find_producer_consumer_candidates(operations) {
        let outputs = operations[producer].outputs.clone();
        let Some(node) = operations.get_index_mut(consumer).map(|(_, node)| node) else {
            continue;
        };
        for slot in &mut node.inputs {
            if let Some((resource, field)) = try_merge_input_resource(slot, &outputs, resources) {
                debug!(from = %slot.resource, to = %resource, field = %field, "merged input resource");
                slot.resource = resource;
                slot.resource_field = Some(field);
            }
        }
    }
}

fn try_merge_input_resource(
    slot: &InputSlot,
    producer_outputs: &[OutputSlot],
    resources: &ResourceMap,
) -> Option<(String, String)> {
    if slot.is_array_item() {
        return None;
    }
    let consumer_resource = resources.get(&slot.resource)?;
    if consumer_resource.source != DefinitionSource::ParameterInference {
        return None;
    }
    for output in producer_outputs {
        let Some(producer_resource) = resources
            .get(&output.resource)
            .filter(|resource| resource.source == DefinitionSource::SchemaWithProperties)
        else {
            continue;
        };
        for name in [&slot.resource, &producer_resource.name] {
            if let Some(field) = naming::find_matching_field(&slot.parameter_name, name, &producer_resource.fields) {
                return Some((producer_resource.name.clone(), field.to_string()));
            }
        }
    }
    None
}

/// Index pairs `(producer, consumer)` following the collection/item pattern.
fn find_producer_consumer_candidates(operations: &OperationMap) -> Vec<(usize, usize)> {
    let mut groups: indexmap::IndexMap<String, Vec<usize>> = indexmap::IndexMap::new();
    for (idx, (_, node)) in operations.iter().enumerate() {
        groups.entry(base_path(&node.path)).or_default().push(idx);
    }

    let mut candidates = Vec::new();
    for members in groups.values() {
        for &producer_idx in members {
            let producer = &operations[producer_idx];
            if !matches!(producer.method.as_str(), "post" | "put") || producer.outputs.is_empty() {
                continue;
            }
            for &consumer_idx in members {
                let consumer = &operations[consumer_idx];
                if !consumer.inputs.is_empty() && is_collection_item_pattern(&producer.path, &consumer.path) {
                    candidates.push((producer_idx, consumer_idx));
                }
            }
        }
    }
    candidates
}

/// `/blog/posts/{id}` -> `/blog/posts`.
fn base_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.starts_with('{'))
        .collect::<Vec<_>>()
        .join("/")
        .trim_end_matches('/')
        .to_string()
}

/// `/blog/posts` + `/blog/posts/{postId}`.
fn is_collection_item_pattern(collection: &str, item: &str) -> bool {
    let collection = collection.trim_end_matches('/');
    let item = item.trim_end_matches('/');
    let Some(remainder) = item
        .strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return false;
    };
    remainder.len() > 2 && remainder.starts_with('{') && remainder.ends_with('}') && !remainder.contains('/')
}
