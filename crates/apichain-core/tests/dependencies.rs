//! End-to-end dependency inference over small OpenAPI documents.

use serde_json::{json, Value};

use apichain_core::layers::compute_dependency_layers;
use apichain_core::{analyze, ApiSchema, Cardinality, DefinitionSource, ParameterLocation, SchemaAnalysis};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn openapi(paths: Value) -> ApiSchema {
    ApiSchema::from_value(json!({
        "openapi": "3.0.0",
        "info": {"title": "Test", "version": "1.0.0"},
        "paths": paths
    }))
    .unwrap()
}

fn json_response(schema: Value) -> Value {
    json!({"description": "", "content": {"application/json": {"schema": schema}}})
}

fn path_parameter(name: &str) -> Value {
    json!({"name": name, "in": "path", "required": true, "schema": {"type": "string"}})
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

#[test]
fn late_schema_upgrades_placeholder_and_rebinds_inputs() {
    // DELETE comes first, so `User` starts out as a `userId` placeholder.
    let api = openapi(json!({
        "/users/{userId}": {"delete": {
            "parameters": [path_parameter("userId")],
            "responses": {"204": {"description": ""}}
        }},
        "/users": {"post": {
            "responses": {"201": json_response(json!({
                "type": "object",
                "properties": {"id": {"type": "string"}, "email": {"type": "string"}}
            }))}
        }}
    }));

    let graph = analyze(&api);

    let user = &graph.resources["User"];
    assert_eq!(user.fields, vec!["id".to_string(), "email".to_string()]);
    assert_eq!(user.source, DefinitionSource::SchemaWithProperties);

    let slot = &graph.operations["DELETE /users/{userId}"].inputs[0];
    assert_eq!(slot.resource, "User");
    assert_eq!(slot.parameter_name, "userId");
    assert_eq!(slot.parameter_location, ParameterLocation::Path);
    assert_eq!(slot.resource_field.as_deref(), Some("id"));

    let output = &graph.operations["POST /users"].outputs[0];
    assert_eq!(output.resource, "User");
    assert_eq!(output.status_code, "201");
    assert_eq!(output.cardinality, Cardinality::One);
}

#[test]
fn paginated_lists_produce_collections() {
    let api = openapi(json!({
        "/users": {"get": {"responses": {"200": json_response(json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"$ref": "#/components/schemas/User"}},
                "total": {"type": "integer"},
                "next": {"type": "string"}
            }
        }))}}},
        "/users/{userId}": {"get": {
            "parameters": [path_parameter("userId")],
            "responses": {"200": json_response(json!({"$ref": "#/components/schemas/User"}))}
        }}
    }));
    let mut raw = api.into_raw();
    raw["components"] = json!({"schemas": {"User": {
        "type": "object",
        "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}
    }}});
    let api = ApiSchema::from_value(raw).unwrap();

    let graph = analyze(&api);
    let output = &graph.operations["GET /users"].outputs[0];
    assert_eq!(output.resource, "User");
    assert_eq!(output.pointer, "/items");
    assert_eq!(output.cardinality, Cardinality::Many);

    let links: Vec<_> = graph.iter_links().collect();
    let from_list = links
        .iter()
        .find(|response| response.producer.label() == "GET /users")
        .unwrap();
    assert_eq!(
        from_list.links["GetUser"].parameters["path.userId"],
        "$response.body#/items/0/id"
    );
}

#[test]
fn operations_without_resources_are_still_listed() {
    let api = openapi(json!({
        "/health": {"get": {"responses": {"200": {"description": "ok"}}}}
    }));
    let graph = analyze(&api);
    assert!(graph.operations.contains_key("GET /health"));
    assert!(graph.resources.is_empty());
    assert!(!graph.has_dependencies());
    assert_eq!(compute_dependency_layers(&graph), None);
}

#[test]
fn swagger_body_parameters_are_inputs() {
    let api = ApiSchema::from_value(json!({
        "swagger": "2.0",
        "info": {"title": "Test", "version": "1.0.0"},
        "paths": {
            "/teams": {"post": {
                "responses": {"201": {"description": "", "schema": {
                    "type": "object",
                    "properties": {"id": {"type": "string"}}
                }}}
            }},
            "/members": {"post": {
                "consumes": ["application/json"],
                "parameters": [{"name": "payload", "in": "body", "required": true, "schema": {
                    "type": "object",
                    "properties": {"teamId": {"type": "string"}}
                }}],
                "responses": {"201": {"description": ""}}
            }}
        }
    }))
    .unwrap();
    assert_eq!(api.links_field(), "x-links");

    let graph = analyze(&api);
    let slot = &graph.operations["POST /members"].inputs[0];
    assert_eq!(slot.resource, "Team");
    assert_eq!(slot.parameter_name, "teamId");
    assert_eq!(slot.parameter_location, ParameterLocation::Body);
    assert_eq!(slot.resource_field.as_deref(), Some("id"));
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

#[test]
fn layers_follow_producer_consumer_chains() {
    let api = openapi(json!({
        "/orders/{orderId}": {"get": {
            "parameters": [path_parameter("orderId")],
            "responses": {"200": {"description": ""}}
        }},
        "/users/{userId}/orders": {"post": {
            "parameters": [path_parameter("userId")],
            "responses": {"201": json_response(json!({
                "type": "object",
                "properties": {"id": {"type": "string"}, "total": {"type": "number"}}
            }))}
        }},
        "/users": {"post": {
            "responses": {"201": json_response(json!({
                "type": "object",
                "properties": {"id": {"type": "string"}}
            }))}
        }}
    }));

    let analysis = SchemaAnalysis::new(api);
    let layers = analysis.dependency_layers().unwrap();
    assert_eq!(
        layers,
        &[
            vec!["POST /users".to_string()],
            vec!["POST /users/{userId}/orders".to_string()],
            vec!["GET /orders/{orderId}".to_string()],
        ]
    );
}

// ---------------------------------------------------------------------------
// Injection through the cached analysis
// ---------------------------------------------------------------------------

#[test]
fn second_injection_is_a_no_op() {
    let api = openapi(json!({
        "/users": {"post": {"responses": {"201": json_response(json!({
            "type": "object",
            "properties": {"id": {"type": "string"}}
        }))}}},
        "/users/{userId}": {
            "get": {
                "parameters": [path_parameter("userId")],
                "responses": {"200": {"description": ""}}
            },
            "delete": {
                "parameters": [path_parameter("userId")],
                "responses": {"204": {"description": ""}}
            }
        }
    }));

    let mut analysis = SchemaAnalysis::new(api);
    assert_eq!(analysis.inject_links(), 2);
    assert_eq!(analysis.inject_links(), 0);

    let raw = analysis.into_schema().into_raw();
    let links = &raw["paths"]["/users"]["post"]["responses"]["201"]["links"];
    assert_eq!(
        links["GetUser"],
        json!({
            "operationRef": "#/paths/~1users~1{userId}/get",
            "parameters": {"path.userId": "$response.body#/id"},
            "x-apichain": {"is_inferred": true}
        })
    );
    assert_eq!(
        links["DeleteUser"]["operationRef"],
        "#/paths/~1users~1{userId}/delete"
    );
}
