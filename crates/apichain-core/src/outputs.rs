//! Output extraction: which resources an operation's successful responses
//! produce, and where in the body they live.

use indexmap::IndexSet;
use serde_json::Value;
use tracing::debug;

use crate::error::SchemaError;
use crate::graph::extend_pointer;
use crate::naming;
use crate::pointer::ROOT_POINTER;
use crate::resource::{Cardinality, DefinitionSource, OutputSlot, ResourceDefinition, ResourceMap};
use crate::schema::{ApiSchema, Operation, ResponseDefinition};
use crate::unwrap::{
    json_types, merge_all_of, recover_ref_from_all_of, resource_name_from_ref,
    try_unwrap_composition, unwrap_schema,
};

/// A resource found in a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedResource {
    pub resource: String,
    pub pointer: String,
    pub cardinality: Cardinality,
}

/// Shared mutable state of one extraction pass.
pub struct ExtractionContext<'a> {
    pub api: &'a ApiSchema,
    pub resources: &'a mut ResourceMap,
    /// Names of resources whose definition was upgraded during the pass.
    pub updated: &'a mut IndexSet<String>,
}

/// Output slots for every resource produced by a 2xx response of `operation`.
pub fn extract_outputs(
    cx: &mut ExtractionContext<'_>,
    operation: &Operation,
) -> Result<Vec<OutputSlot>, SchemaError> {
    let mut outputs = Vec::new();
    for response in operation.successful_responses() {
        for extracted in extract_from_response(cx, &operation.path, response)? {
            outputs.push(OutputSlot {
                resource: extracted.resource,
                pointer: extracted.pointer,
                cardinality: extracted.cardinality,
                status_code: response.status_code.clone(),
            });
        }
    }
    Ok(outputs)
}

/// Searches the successful responses of `operation` for a named resource.
///
/// Stops at the first response that yields it; later responses are not
/// scanned.
pub fn find_resource_in_responses(
    cx: &mut ExtractionContext<'_>,
    operation: &Operation,
    resource_name: &str,
) -> Result<bool, SchemaError> {
    for response in operation.successful_responses() {
        let extracted = extract_from_response(cx, &operation.path, response)?;
        if extracted.iter().any(|found| found.resource == resource_name) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resources described by a single response, main resource first.
pub fn extract_from_response(
    cx: &mut ExtractionContext<'_>,
    path: &str,
    response: &ResponseDefinition,
) -> Result<Vec<ExtractedResource>, SchemaError> {
    let raw = match &response.schema {
        Some(Value::Bool(true)) => return Ok(resource_from_boolean_schema(cx, path).into_iter().collect()),
        Some(schema @ Value::Object(_)) => schema,
        _ => return Ok(Vec::new()),
    };
    let api = cx.api;

    let mut name_ref = raw.get("$ref").and_then(Value::as_str).map(str::to_string);
    let mut resolved = api.resolve(raw)?.clone();

    // `{"data": ...}` envelopes
    let mut data_pointer = None;
    let data = resolved
        .get("properties")
        .and_then(Value::as_object)
        .filter(|properties| properties.len() == 1)
        .and_then(|properties| properties.get("data"))
        .cloned();
    if let Some(data) = data {
        data_pointer = Some("/data");
        if let Some(reference) = data.get("$ref").and_then(Value::as_str) {
            name_ref = Some(reference.to_string());
        }
        resolved = api.resolve(&data)?.clone();
    }

    let alternative = try_unwrap_composition(api, &resolved)?;
    if let Some(reference) = alternative.get("$ref").and_then(Value::as_str) {
        name_ref = Some(reference.to_string());
    }
    let resolved = api.resolve(&alternative)?.clone();

    let canonical = if resolved.get("allOf").is_some() {
        merge_all_of(api, &resolved).unwrap_or_else(|_| resolved.clone())
    } else {
        resolved.clone()
    };

    let unwrapped = unwrap_schema(api, &canonical, path, name_ref.as_deref())?;

    let mut recovered = None;
    if unwrapped.pointer != ROOT_POINTER {
        if let Some(branches) = resolved.get("allOf").and_then(Value::as_array) {
            recovered = recover_ref_from_all_of(api, branches, &unwrapped.pointer)?;
        }
    }
    let reference = recovered.or(unwrapped.reference.clone()).or(name_ref);

    let Some((resource, cardinality)) =
        extract_resource_and_cardinality(cx, &unwrapped.schema, path, reference.as_deref())?
    else {
        return Ok(Vec::new());
    };

    let pointer = match data_pointer {
        Some(prefix) if unwrapped.pointer != ROOT_POINTER => format!("{prefix}{}", unwrapped.pointer),
        Some(prefix) => prefix.to_string(),
        None => unwrapped.pointer.clone(),
    };

    let mut extracted = vec![ExtractedResource {
        resource,
        pointer: pointer.clone(),
        cardinality,
    }];

    // Nested resources referenced by name, e.g. `{"owner": {"$ref": ".../User"}}`
    if let Some(properties) = unwrapped.schema.get("properties").and_then(Value::as_object) {
        for (field, subschema) in properties {
            let Some(reference) = subschema.get("$ref").and_then(Value::as_str) else {
                continue;
            };
            if let Some((resource, cardinality)) =
                extract_resource_and_cardinality(cx, subschema, path, Some(reference))?
            {
                extracted.push(ExtractedResource {
                    resource,
                    pointer: extend_pointer(&pointer, field, cardinality),
                    cardinality,
                });
            }
        }
    }

    Ok(extracted)
}

fn resource_from_boolean_schema(cx: &mut ExtractionContext<'_>, path: &str) -> Option<ExtractedResource> {
    let name = naming::from_path(path)?;
    // An existing definition always has more information than `true`.
    cx.resources
        .entry(name.clone())
        .or_insert_with(|| ResourceDefinition::without_properties(name.clone()));
    Some(ExtractedResource {
        resource: name,
        pointer: ROOT_POINTER.to_string(),
        cardinality: Cardinality::One,
    })
}

fn extract_resource_and_cardinality(
    cx: &mut ExtractionContext<'_>,
    schema: &Value,
    path: &str,
    parent_ref: Option<&str>,
) -> Result<Option<(String, Cardinality)>, SchemaError> {
    let is_array = schema.get("type").and_then(Value::as_str) == Some("array")
        || schema.get("items").is_some();
    if !is_array {
        let resource = extract_resource_from_schema(cx, schema, path, parent_ref)?;
        return Ok(resource.map(|name| (name, Cardinality::One)));
    }

    let Some(items) = schema.get("items").filter(|items| items.is_object()) else {
        return Ok(None);
    };
    let items_ref = items.get("$ref").and_then(Value::as_str).or(parent_ref);
    let api = cx.api;
    let resolved_items = api.resolve(items)?;
    let resource = extract_resource_from_schema(cx, resolved_items, path, items_ref)?;
    Ok(resource.map(|name| (name, Cardinality::Many)))
}

/// Registers (or upgrades) the resource described by `schema`.
///
/// The name comes from the schema's own `$ref`, then from `parent_ref`, and
/// finally from the path.
fn extract_resource_from_schema(
    cx: &mut ExtractionContext<'_>,
    schema: &Value,
    path: &str,
    parent_ref: Option<&str>,
) -> Result<Option<String>, SchemaError> {
    let name = match schema.get("$ref").and_then(Value::as_str).or(parent_ref) {
        Some(reference) => resource_name_from_ref(reference).to_string(),
        None => match naming::from_path(path) {
            Some(name) => name,
            None => return Ok(None),
        },
    };

    let needs_definition = cx
        .resources
        .get(&name)
        .map_or(true, |existing| existing.source < DefinitionSource::SchemaWithProperties);
    if !needs_definition {
        return Ok(Some(name));
    }

    let api = cx.api;
    let resolved = api.resolve(schema)?;
    let properties = resolved
        .get("properties")
        .and_then(Value::as_object)
        .filter(|properties| !properties.is_empty());
    if properties.is_none()
        && resolved
            .get("type")
            .is_some_and(|ty| ty.as_str() != Some("object"))
    {
        // Strings, numbers and the like are not resources.
        return Ok(None);
    }

    let (source, fields, types) = match properties {
        Some(properties) => (
            DefinitionSource::SchemaWithProperties,
            properties.keys().cloned().collect(),
            properties
                .iter()
                .map(|(field, subschema)| {
                    let subschema = api.resolve(subschema).unwrap_or(subschema);
                    (field.clone(), json_types(subschema))
                })
                .collect(),
        ),
        None => (
            DefinitionSource::SchemaWithoutProperties,
            Vec::new(),
            Default::default(),
        ),
    };

    match cx.resources.get_mut(&name) {
        Some(existing) => {
            if existing.upgrade(source, fields, types) {
                debug!(resource = %name, ?source, "upgraded resource from response schema");
                cx.updated.insert(name.clone());
            }
        }
        None => {
            cx.resources.insert(
                name.clone(),
                ResourceDefinition {
                    name: name.clone(),
                    fields,
                    types,
                    source,
                },
            );
        }
    }
    Ok(Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OperationKey;
    use serde_json::json;

    fn schema(paths: Value) -> ApiSchema {
        ApiSchema::from_value(json!({
            "openapi": "3.0.0",
            "paths": paths,
            "components": {"schemas": {
                "User": {"type": "object", "properties": {
                    "id": {"type": "string"},
                    "email": {"type": "string"},
                    "team": {"$ref": "#/components/schemas/Team"}
                }},
                "Team": {"type": "object", "properties": {"id": {"type": "integer"}}}
            }}
        }))
        .unwrap()
    }

    fn extract(api: &ApiSchema, method: &str, path: &str) -> (Vec<OutputSlot>, ResourceMap) {
        let operation = api.operation(&OperationKey::new(method, path)).unwrap().unwrap();
        let mut resources = ResourceMap::new();
        let mut updated = IndexSet::new();
        let mut cx = ExtractionContext {
            api,
            resources: &mut resources,
            updated: &mut updated,
        };
        let outputs = extract_outputs(&mut cx, &operation).unwrap();
        (outputs, resources)
    }

    fn respond(schema: Value) -> Value {
        json!({"responses": {"200": {"description": "", "content": {"application/json": {"schema": schema}}}}})
    }

    #[test]
    fn referenced_object_with_sub_resources() {
        let api = schema(json!({"/users/{id}": {"get": respond(json!({"$ref": "#/components/schemas/User"}))}}));
        let (outputs, resources) = extract(&api, "get", "/users/{id}");
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].resource, "User");
        assert_eq!(outputs[0].pointer, "/");
        assert_eq!(outputs[0].cardinality, Cardinality::One);
        assert_eq!(outputs[1].resource, "Team");
        assert_eq!(outputs[1].pointer, "/team");
        assert_eq!(resources["User"].fields, vec!["id", "email", "team"]);
        assert_eq!(resources["User"].source, DefinitionSource::SchemaWithProperties);
    }

    #[test]
    fn data_envelope_with_collection() {
        let api = schema(json!({"/users": {"get": respond(json!({
            "type": "object",
            "properties": {"data": {"type": "array", "items": {"$ref": "#/components/schemas/User"}}}
        }))}}));
        let (outputs, _) = extract(&api, "get", "/users");
        assert_eq!(outputs[0].resource, "User");
        assert_eq!(outputs[0].pointer, "/data");
        assert_eq!(outputs[0].cardinality, Cardinality::Many);
    }

    #[test]
    fn inline_schema_is_named_after_path() {
        let api = schema(json!({"/orders": {"post": {"responses": {"201": {
            "description": "",
            "content": {"application/json": {"schema": {"type": "object", "properties": {"id": {"type": "integer"}}}}}
        }}}}}));
        let (outputs, resources) = extract(&api, "post", "/orders");
        assert_eq!(outputs[0].resource, "Order");
        assert_eq!(outputs[0].status_code, "201");
        assert_eq!(
            resources["Order"].types["id"],
            std::collections::BTreeSet::from(["integer".to_string()])
        );
    }

    #[test]
    fn primitives_and_errors_are_ignored() {
        let api = schema(json!({"/health": {"get": {"responses": {
            "200": {"description": "", "content": {"application/json": {"schema": {"type": "string"}}}},
            "404": {"description": "", "content": {"application/json": {"schema": {"$ref": "#/components/schemas/User"}}}}
        }}}}));
        let (outputs, resources) = extract(&api, "get", "/health");
        assert!(outputs.is_empty());
        assert!(resources.is_empty());
    }

    #[test]
    fn boolean_schema_yields_property_less_resource() {
        let api = schema(json!({"/pets": {"post": respond(json!(true))}}));
        let (outputs, resources) = extract(&api, "post", "/pets");
        assert_eq!(outputs[0].resource, "Pet");
        assert_eq!(resources["Pet"].source, DefinitionSource::SchemaWithoutProperties);
    }

    #[test]
    fn dangling_reference_fails_the_operation() {
        let api = schema(json!({"/users": {"get": respond(json!({"$ref": "#/components/schemas/Nope"}))}}));
        let operation = api.operation(&OperationKey::new("get", "/users")).unwrap().unwrap();
        let mut resources = ResourceMap::new();
        let mut updated = IndexSet::new();
        let mut cx = ExtractionContext {
            api: &api,
            resources: &mut resources,
            updated: &mut updated,
        };
        assert!(extract_outputs(&mut cx, &operation).is_err());
    }
}
