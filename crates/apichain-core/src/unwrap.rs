//! Response schema unwrapping.
//!
//! APIs rarely return a bare resource. This module peels off the common
//! wrappers (composition keywords, HAL `_embedded`, pagination envelopes,
//! externally tagged objects) and reports where inside the body the actual
//! resource lives.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::naming;
use crate::pointer::{encode_pointer, ROOT_POINTER};
use crate::schema::ApiSchema;

const PRIMITIVE_TYPES: [&str; 5] = ["string", "number", "integer", "boolean", "null"];

const ALL_TYPES: [&str; 7] = [
    "null", "boolean", "integer", "number", "string", "array", "object",
];

/// Keywords that make an untyped schema carry structural information.
const STRUCTURAL_KEYWORDS: [&str; 18] = [
    "type",
    "properties",
    "additionalProperties",
    "patternProperties",
    "required",
    "items",
    "prefixItems",
    "enum",
    "const",
    "format",
    "minProperties",
    "maxProperties",
    "minItems",
    "maxItems",
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
];

const PAGINATION_DATA_FIELDS: [&str; 8] = [
    "data", "items", "results", "value", "content", "elements", "records", "list",
];

const PAGINATION_INDICATORS: &[&str] = &[
    "count",
    "total",
    "totalcount",
    "totalelements",
    "page",
    "pagenumber",
    "currentpage",
    "next",
    "previous",
    "prev",
    "nextpage",
    "prevpage",
    "nextpageurl",
    "prevpageurl",
    "nextpagetoken",
    "cursor",
    "nextcursor",
    "nextlink",
    "endcursor",
    "hasmore",
    "hasnextpage",
    "haspreviouspage",
    "pagesize",
    "perpage",
    "limit",
    "size",
    "pageinfo",
    "pagination",
    "links",
    "meta",
];

/// Where a resource sits inside a response body.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwrappedSchema {
    pub pointer: String,
    pub schema: Value,
    /// `$ref` the resource schema was reached through, if any.
    pub reference: Option<String>,
}

/// Last segment of a reference: `#/components/schemas/User` -> `User`.
pub fn resource_name_from_ref(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// JSON types a schema admits. Untyped schemas admit everything.
pub fn json_types(schema: &Value) -> BTreeSet<String> {
    match schema.get("type") {
        Some(Value::String(ty)) => BTreeSet::from([ty.clone()]),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ if schema.get("properties").is_some() => BTreeSet::from(["object".to_string()]),
        _ => ALL_TYPES.iter().map(|ty| ty.to_string()).collect(),
    }
}

fn type_is(schema: &Value, ty: &str) -> bool {
    schema.get("type").and_then(Value::as_str) == Some(ty)
}

fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .filter(|properties| !properties.is_empty())
}

/// Whether a schema describes structured data worth treating as a resource.
pub fn is_interesting(schema: &Value) -> bool {
    if schema.get("$ref").is_some() {
        return true;
    }
    match schema.get("type").and_then(Value::as_str) {
        Some(ty) if PRIMITIVE_TYPES.contains(&ty) => false,
        Some("array") => schema.get("items").is_some_and(|items| items.is_object() && is_interesting(items)),
        _ => {
            ["allOf", "anyOf", "oneOf"]
                .iter()
                .any(|key| schema.get(key).is_some())
                || schema.as_object().is_some_and(|object| {
                    STRUCTURAL_KEYWORDS.iter().any(|keyword| object.contains_key(*keyword))
                })
        }
    }
}

/// Picks the first structured alternative of `oneOf` / `anyOf`.
///
/// The returned alternative is left unresolved so its `$ref` still names
/// the resource.
pub fn try_unwrap_composition(api: &ApiSchema, schema: &Value) -> Result<Value, SchemaError> {
    let Some(alternatives) = ["anyOf", "oneOf"]
        .iter()
        .find_map(|key| schema.get(key))
        .and_then(Value::as_array)
    else {
        return Ok(schema.clone());
    };
    for alternative in alternatives {
        if is_interesting(api.resolve(alternative)?) {
            return Ok(alternative.clone());
        }
    }
    Ok(schema.clone())
}

/// Returns the only interesting `allOf` branch, or the schema itself.
pub fn try_unwrap_all_of(schema: &Value) -> Value {
    let Some(branches) = schema.get("allOf").and_then(Value::as_array) else {
        return schema.clone();
    };
    let mut interesting = branches
        .iter()
        .filter(|branch| branch.is_object() && is_interesting(branch));
    match (interesting.next(), interesting.next()) {
        (Some(only), None) => only.clone(),
        _ => schema.clone(),
    }
}

/// Flattens `allOf` into a single object schema.
///
/// Branches are resolved and merged recursively: properties are combined
/// in branch order (later branches win), `required` lists are unioned, and
/// the first declared `type` is kept.
pub fn merge_all_of(api: &ApiSchema, schema: &Value) -> Result<Value, SchemaError> {
    let mut depth = 0;
    merge_all_of_inner(api, schema, &mut depth)
}

const MAX_MERGE_DEPTH: usize = 32;

fn merge_all_of_inner(
    api: &ApiSchema,
    schema: &Value,
    depth: &mut usize,
) -> Result<Value, SchemaError> {
    let Some(object) = schema.as_object() else {
        return Ok(schema.clone());
    };
    let Some(branches) = object.get("allOf").and_then(Value::as_array) else {
        return Ok(schema.clone());
    };
    *depth += 1;
    if *depth > MAX_MERGE_DEPTH {
        return Err(SchemaError::RecursiveReference {
            reference: "allOf".to_string(),
        });
    }

    let mut merged: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| key.as_str() != "allOf")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let mut merged_properties = merged
        .remove("properties")
        .and_then(|properties| properties.as_object().cloned())
        .unwrap_or_default();
    let mut required: Vec<Value> = merged
        .remove("required")
        .and_then(|required| required.as_array().cloned())
        .unwrap_or_default();

    for branch in branches {
        let branch = merge_all_of_inner(api, api.resolve(branch)?, depth)?;
        if let Some(branch_properties) = branch.get("properties").and_then(Value::as_object) {
            for (name, property) in branch_properties {
                merged_properties.insert(name.clone(), property.clone());
            }
        }
        if let Some(branch_required) = branch.get("required").and_then(Value::as_array) {
            for name in branch_required {
                if !required.contains(name) {
                    required.push(name.clone());
                }
            }
        }
        if !merged.contains_key("type") {
            if let Some(ty) = branch.get("type") {
                merged.insert("type".to_string(), ty.clone());
            }
        }
    }
    *depth -= 1;

    if !merged_properties.is_empty() {
        merged.insert("properties".to_string(), Value::Object(merged_properties));
    }
    if !required.is_empty() {
        merged.insert("required".to_string(), Value::Array(required));
    }
    Ok(Value::Object(merged))
}

/// Finds the `$ref` of the `allOf` branch that declared the property at `pointer`.
///
/// Merging inlines branches, which loses the schema name of a wrapped
/// resource; this recovers it.
pub fn recover_ref_from_all_of(
    api: &ApiSchema,
    branches: &[Value],
    pointer: &str,
) -> Result<Option<String>, SchemaError> {
    let Some(last) = pointer.split('/').filter(|segment| !segment.is_empty()).last() else {
        return Ok(None);
    };
    let last = crate::pointer::decode_pointer(last);
    for branch in branches {
        let declares = api
            .resolve(branch)?
            .get("properties")
            .is_some_and(|properties| properties.get(&last).is_some());
        if !declares {
            continue;
        }
        if let Some(property) = branch.get("properties").and_then(|properties| properties.get(&last)) {
            let reference = property
                .get("$ref")
                .or_else(|| property.get("items").and_then(|items| items.get("$ref")))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(reference);
        }
    }
    Ok(None)
}

/// Detects wrapper patterns and navigates to the resource schema.
pub fn unwrap_schema(
    api: &ApiSchema,
    schema: &Value,
    path: &str,
    parent_ref: Option<&str>,
) -> Result<UnwrappedSchema, SchemaError> {
    if type_is(schema, "array") {
        return Ok(UnwrappedSchema {
            pointer: ROOT_POINTER.to_string(),
            schema: schema.clone(),
            reference: None,
        });
    }

    if let Some(properties) = properties(schema) {
        // HAL (`{"_embedded": {"users": [...]}}`)
        if let Some(embedded) = properties.get("_embedded") {
            let embedded = api.resolve(embedded)?;
            if let Some(embedded_properties) = embedded.get("properties").and_then(Value::as_object) {
                for (name, subschema) in embedded_properties {
                    if subschema.is_object() && type_is(api.resolve(subschema)?, "array") {
                        return Ok(UnwrappedSchema {
                            pointer: format!("/_embedded/{}", encode_pointer(name)),
                            schema: api.resolve(subschema)?.clone(),
                            reference: ref_of(subschema),
                        });
                    }
                }
            }
        }

        if let Some(array_field) = detect_pagination_wrapper(api, properties, path, parent_ref)? {
            let array_schema = &properties[array_field.as_str()];
            let resolved = api.resolve(array_schema)?;
            let mut pointer = format!("/{}", encode_pointer(&array_field));

            // A page of externally tagged items: `{"data": [{"user": {...}}]}`
            let mut target = resolved;
            if let Some(items) = resolved.get("items").filter(|items| items.is_object()) {
                let resolved_items = api.resolve(items)?;
                if let Some(tag) = detect_externally_tagged(api, resolved_items, path)? {
                    pointer.push('/');
                    pointer.push_str(&encode_pointer(&tag));
                    target = api.resolve(&resolved_items["properties"][tag.as_str()])?;
                }
            }

            return Ok(UnwrappedSchema {
                pointer,
                schema: target.clone(),
                reference: ref_of(array_schema),
            });
        }

        if let Some(tag) = detect_externally_tagged(api, schema, path)? {
            let tagged = &properties[tag.as_str()];
            let resolved_tagged = api.resolve(tagged)?;
            let inner = try_unwrap_all_of(resolved_tagged);
            let reference = ref_of(&inner)
                .or_else(|| ref_of(resolved_tagged))
                .or_else(|| ref_of(tagged));
            return Ok(UnwrappedSchema {
                pointer: format!("/{}", encode_pointer(&tag)),
                schema: api.resolve(&inner)?.clone(),
                reference,
            });
        }
    }

    Ok(UnwrappedSchema {
        pointer: ROOT_POINTER.to_string(),
        schema: schema.clone(),
        reference: ref_of(schema),
    })
}

fn ref_of(schema: &Value) -> Option<String> {
    schema.get("$ref").and_then(Value::as_str).map(str::to_string)
}

fn normalize_indicator(name: &str) -> String {
    name.to_lowercase().replace(['_', '-'], "")
}

/// Name of the data array of a pagination envelope, if `properties` looks like one.
fn detect_pagination_wrapper(
    api: &ApiSchema,
    properties: &Map<String, Value>,
    path: &str,
    parent_ref: Option<&str>,
) -> Result<Option<String>, SchemaError> {
    let mut arrays = Vec::new();
    for (name, subschema) in properties {
        if name == "links" || name == "errors" || !subschema.is_object() {
            continue;
        }
        if type_is(api.resolve(subschema)?, "array") {
            arrays.push(name);
        }
    }
    let [array_field] = arrays.as_slice() else {
        return Ok(None);
    };

    let lowered = array_field.to_lowercase();
    let mut matches_data_field = PAGINATION_DATA_FIELDS.contains(&lowered.as_str());
    if !matches_data_field {
        if let Some(parent_ref) = parent_ref {
            let name = naming::strip_affixes(
                resource_name_from_ref(parent_ref),
                &["get", "create", "list", "delete"],
                &["response"],
            );
            matches_data_field = name.to_lowercase() == lowered;
        }
    }
    if !matches_data_field {
        // `/runner-groups` -> `runner_groups`
        let Some(resource) = naming::from_path(path) else {
            return Ok(None);
        };
        if naming::to_plural(&naming::to_snake_case(&resource)) != lowered {
            return Ok(None);
        }
    }

    let has_pagination_metadata = properties
        .keys()
        .filter(|name| name != array_field)
        .any(|name| PAGINATION_INDICATORS.contains(&normalize_indicator(name).as_str()));

    if has_pagination_metadata || properties.len() <= 2 {
        Ok(Some((*array_field).clone()))
    } else {
        Ok(None)
    }
}

/// Detects `{"Users": {...}}` style objects keyed by the resource name.
fn detect_externally_tagged(
    api: &ApiSchema,
    schema: &Value,
    path: &str,
) -> Result<Option<String>, SchemaError> {
    let Some(properties) = properties(schema) else {
        return Ok(None);
    };
    let Some(resource) = naming::from_path(path) else {
        return Ok(None);
    };
    let lowered = resource.to_lowercase();
    let candidates = [
        lowered.clone(),
        naming::to_plural(&lowered),
        naming::to_snake_case(&resource),
    ];
    for (name, subschema) in properties {
        if !candidates.contains(&name.to_lowercase()) || !subschema.is_object() {
            continue;
        }
        if json_types(api.resolve(subschema)?).contains("object") {
            return Ok(Some(name.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api() -> ApiSchema {
        ApiSchema::from_value(json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {"schemas": {
                "User": {"type": "object", "properties": {"id": {"type": "string"}, "name": {"type": "string"}}},
                "Base": {"type": "object", "properties": {"id": {"type": "integer"}}, "required": ["id"]},
                "UserList": {"type": "array", "items": {"$ref": "#/components/schemas/User"}}
            }}
        }))
        .unwrap()
    }

    #[test]
    fn root_array_is_left_alone() {
        let schema = json!({"type": "array", "items": {"$ref": "#/components/schemas/User"}});
        let unwrapped = unwrap_schema(&api(), &schema, "/users", None).unwrap();
        assert_eq!(unwrapped.pointer, "/");
        assert_eq!(unwrapped.reference, None);
    }

    #[test]
    fn hal_embedded_collection() {
        let schema = json!({"type": "object", "properties": {
            "_embedded": {"type": "object", "properties": {
                "users": {"type": "array", "items": {"$ref": "#/components/schemas/User"}}
            }},
            "_links": {"type": "object"}
        }});
        let unwrapped = unwrap_schema(&api(), &schema, "/users", None).unwrap();
        assert_eq!(unwrapped.pointer, "/_embedded/users");
        assert!(type_is(&unwrapped.schema, "array"));
    }

    #[test]
    fn pagination_wrapper_with_metadata() {
        let schema = json!({"type": "object", "properties": {
            "results": {"$ref": "#/components/schemas/UserList"},
            "total_count": {"type": "integer"},
            "next_page": {"type": "string"},
            "request_id": {"type": "string"}
        }});
        let unwrapped = unwrap_schema(&api(), &schema, "/users", None).unwrap();
        assert_eq!(unwrapped.pointer, "/results");
        assert_eq!(unwrapped.reference.as_deref(), Some("#/components/schemas/UserList"));
    }

    #[test]
    fn pagination_field_named_after_resource() {
        let schema = json!({"type": "object", "properties": {
            "runner_groups": {"type": "array", "items": {"type": "object", "properties": {"id": {}}}},
            "total_count": {"type": "integer"}
        }});
        let unwrapped = unwrap_schema(&api(), &schema, "/orgs/{org}/runner-groups", None).unwrap();
        assert_eq!(unwrapped.pointer, "/runner_groups");
    }

    #[test]
    fn unrelated_array_is_not_a_wrapper() {
        let schema = json!({"type": "object", "properties": {
            "id": {"type": "string"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "name": {"type": "string"}
        }});
        let unwrapped = unwrap_schema(&api(), &schema, "/users", None).unwrap();
        assert_eq!(unwrapped.pointer, "/");
    }

    #[test]
    fn externally_tagged_object() {
        let schema = json!({"type": "object", "properties": {
            "User": {"$ref": "#/components/schemas/User"}
        }});
        let unwrapped = unwrap_schema(&api(), &schema, "/users/{id}", None).unwrap();
        assert_eq!(unwrapped.pointer, "/User");
        assert_eq!(unwrapped.reference.as_deref(), Some("#/components/schemas/User"));
        assert!(unwrapped.schema.get("properties").is_some());
    }

    #[test]
    fn composition_picks_first_structured_alternative() {
        let schema = json!({"oneOf": [
            {"type": "string"},
            {"$ref": "#/components/schemas/User"},
            {"type": "object", "properties": {"other": {}}}
        ]});
        let picked = try_unwrap_composition(&api(), &schema).unwrap();
        assert_eq!(picked, json!({"$ref": "#/components/schemas/User"}));

        let primitives = json!({"anyOf": [{"type": "string"}, {"type": "integer"}]});
        assert_eq!(try_unwrap_composition(&api(), &primitives).unwrap(), primitives);
    }

    #[test]
    fn all_of_branches_are_merged() {
        let schema = json!({"allOf": [
            {"$ref": "#/components/schemas/Base"},
            {"type": "object", "properties": {"email": {"type": "string"}}, "required": ["email"]}
        ]});
        let merged = merge_all_of(&api(), &schema).unwrap();
        let keys: Vec<&String> = merged["properties"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["id", "email"]);
        assert_eq!(merged["required"], json!(["id", "email"]));
        assert_eq!(merged["type"], json!("object"));
    }

    #[test]
    fn recovers_reference_lost_by_merging() {
        let branches = vec![
            json!({"type": "object", "properties": {"data": {"$ref": "#/components/schemas/User"}}}),
            json!({"type": "object", "properties": {"meta": {"type": "object"}}}),
        ];
        let recovered = recover_ref_from_all_of(&api(), &branches, "/data").unwrap();
        assert_eq!(recovered.as_deref(), Some("#/components/schemas/User"));
    }

    #[test]
    fn type_sets() {
        assert_eq!(json_types(&json!({"type": "string"})), BTreeSet::from(["string".to_string()]));
        assert_eq!(json_types(&json!({"type": ["string", "null"]})).len(), 2);
        assert_eq!(json_types(&json!({})).len(), 7);
        assert!(!is_interesting(&json!({"type": "integer"})));
        assert!(is_interesting(&json!({"type": "array", "items": {"$ref": "#/x"}})));
        assert!(!is_interesting(&json!({"description": "free-form"})));
    }
}
