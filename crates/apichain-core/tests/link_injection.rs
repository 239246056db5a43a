//! Deduplication of inferred links against links the schema already declares.
//!
//! Every schema here has `POST /customers` producing a `Customer` and
//! `POST /orders` consuming it through `customer_id`. The declared links on
//! the `201` response of `POST /customers` vary per test.

use serde_json::{json, Map, Value};

use apichain_core::{analyze, inject_links, ApiSchema};

// ---------------------------------------------------------------------------
// Schema builders
// ---------------------------------------------------------------------------

fn schema_with_id() -> Value {
    json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]})
}

fn customer_post(links: Option<Value>) -> (String, Value) {
    let mut created = json!({
        "description": "Created",
        "content": {"application/json": {"schema": schema_with_id()}}
    });
    if let Some(links) = links {
        created["links"] = links;
    }
    (
        "/customers".to_string(),
        json!({"post": {"operationId": "createCustomer", "responses": {"201": created}}}),
    )
}

enum OrderInput {
    Parameter { name: &'static str, location: &'static str },
    Body,
}

fn order_post(input: OrderInput) -> (String, Value) {
    let mut operation = json!({"operationId": "createOrder"});
    match input {
        OrderInput::Parameter { name, location } => {
            operation["parameters"] = json!([{"name": name, "in": location, "required": true, "schema": {"type": "string"}}]);
            operation["responses"] = json!({"201": {
                "description": "Created",
                "content": {"application/json": {"schema": schema_with_id()}}
            }});
        }
        OrderInput::Body => {
            operation["requestBody"] = json!({
                "required": true,
                "content": {"application/json": {"schema": {
                    "type": "object",
                    "properties": {"customer_id": {"type": "string"}, "total": {"type": "number"}},
                    "required": ["customer_id"]
                }}}
            });
            operation["responses"] = json!({"201": {
                "description": "Created",
                "content": {"application/json": {"schema": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "customer_id": {"type": "string"},
                        "total": {"type": "number"}
                    },
                    "required": ["id"]
                }}}
            }});
        }
    }
    ("/orders".to_string(), json!({"post": operation}))
}

fn path_order() -> (String, Value) {
    order_post(OrderInput::Parameter {
        name: "customer_id",
        location: "path",
    })
}

fn customer_get() -> (String, Value) {
    (
        "/customers/{customer_id}".to_string(),
        json!({"get": {
            "operationId": "getCustomer",
            "parameters": [{"name": "customer_id", "in": "path", "required": true, "schema": {"type": "string"}}],
            "responses": {"200": {
                "description": "OK",
                "content": {"application/json": {"schema": schema_with_id()}}
            }}
        }}),
    )
}

fn injected(paths: Vec<(String, Value)>) -> usize {
    let paths: Map<String, Value> = paths.into_iter().collect();
    let mut api = ApiSchema::from_value(json!({
        "openapi": "3.0.0",
        "info": {"title": "Shop", "version": "1.0.0"},
        "paths": paths
    }))
    .unwrap();
    let graph = analyze(&api);
    inject_links(&mut api, &graph)
}

// ---------------------------------------------------------------------------
// Parameter links
// ---------------------------------------------------------------------------

#[test]
fn duplicate_by_operation_id() {
    let links = json!({"CreateOrder": {"operationId": "createOrder", "parameters": {"customer_id": "$response.body#/id"}}});
    assert_eq!(injected(vec![customer_post(Some(links)), path_order()]), 0);
}

#[test]
fn duplicate_by_operation_ref() {
    let links = json!({"CreateOrder": {
        "operationRef": "#/paths/~1orders/post",
        "parameters": {"customer_id": "$response.body#/id"}
    }});
    assert_eq!(injected(vec![customer_post(Some(links)), path_order()]), 0);
}

#[test]
fn duplicate_with_qualified_parameter() {
    let links = json!({"CreateOrder": {
        "operationRef": "#/paths/~1orders/post",
        "parameters": {"path.customer_id": "$response.body#/id"}
    }});
    assert_eq!(injected(vec![customer_post(Some(links)), path_order()]), 0);
}

#[test]
fn name_collision_gets_suffix() {
    let links = json!({"PostCustomer": {
        "operationRef": "#/paths/~1customers/post",
        "parameters": {"query.something-else": "$response.body#/id"}
    }});
    let paths: Map<String, Value> = vec![customer_post(Some(links)), path_order()].into_iter().collect();
    let mut api = ApiSchema::from_value(json!({"openapi": "3.0.0", "paths": paths})).unwrap();
    let graph = analyze(&api);
    assert_eq!(inject_links(&mut api, &graph), 1);

    let links = &api.raw()["paths"]["/customers"]["post"]["responses"]["201"]["links"];
    assert_eq!(links["PostCustomer"]["operationRef"], "#/paths/~1customers/post");
    assert_eq!(links["PostCustomer_0"]["operationRef"], "#/paths/~1orders/post");
    assert_eq!(
        links["PostCustomer_0"]["parameters"],
        json!({"path.customer_id": "$response.body#/id"})
    );
}

#[test]
fn different_parameter_name_is_kept() {
    let links = json!({"CreateOrder": {"operationId": "createOrder", "parameters": {"user_id": "$response.body#/id"}}});
    assert_eq!(injected(vec![customer_post(Some(links)), path_order()]), 1);
}

#[test]
fn different_target_is_kept() {
    let links = json!({"GetCustomer": {"operationId": "getCustomer", "parameters": {"customer_id": "$response.body#/id"}}});
    assert_eq!(
        injected(vec![customer_post(Some(links)), customer_get(), path_order()]),
        2
    );
}

#[test]
fn no_declared_links() {
    assert_eq!(injected(vec![customer_post(None), path_order()]), 1);
}

#[test]
fn inferred_parameters_subset_of_declared() {
    let links = json!({"CreateOrder": {
        "operationId": "createOrder",
        "parameters": {"customer_id": "$response.body#/id", "priority": "high"}
    }});
    let order = order_post(OrderInput::Parameter {
        name: "customer_id",
        location: "query",
    });
    assert_eq!(injected(vec![customer_post(Some(links)), order]), 0);
}

#[test]
fn inferred_parameters_equal_declared() {
    let links = json!({"CreateOrder": {"operationId": "createOrder", "parameters": {"customer_id": "$response.body#/id"}}});
    let order = order_post(OrderInput::Parameter {
        name: "customer_id",
        location: "query",
    });
    assert_eq!(injected(vec![customer_post(Some(links)), order]), 0);
}

#[test]
fn missing_inferred_body_is_a_subset() {
    let links = json!({"CreateOrder": {
        "operationId": "createOrder",
        "parameters": {"customer_id": "$response.body#/id"},
        "requestBody": {"order_type": "standard"}
    }});
    let order = order_post(OrderInput::Parameter {
        name: "customer_id",
        location: "query",
    });
    assert_eq!(injected(vec![customer_post(Some(links)), order]), 0);
}

// ---------------------------------------------------------------------------
// Body links
// ---------------------------------------------------------------------------

#[test]
fn duplicate_body_link() {
    let links = json!({"CreateOrder": {"operationId": "createOrder", "requestBody": {"customer_id": "$response.body#/id"}}});
    assert_eq!(injected(vec![customer_post(Some(links)), order_post(OrderInput::Body)]), 0);
}

#[test]
fn inferred_body_subset_of_declared() {
    let links = json!({"CreateOrder": {
        "operationId": "createOrder",
        "requestBody": {"customer_id": "$response.body#/id", "order_type": "standard"}
    }});
    assert_eq!(injected(vec![customer_post(Some(links)), order_post(OrderInput::Body)]), 0);
}

#[test]
fn string_body_does_not_cover_object_body() {
    let links = json!({"CreateOrder": {"operationId": "createOrder", "requestBody": "$response.body#/customer_data"}});
    assert_eq!(injected(vec![customer_post(Some(links)), order_post(OrderInput::Body)]), 1);
}

#[test]
fn inferred_body_not_covered_by_bodiless_link() {
    let links = json!({"CreateOrder": {"operationId": "createOrder", "parameters": {"customer_id": "$response.body#/id"}}});
    assert_eq!(injected(vec![customer_post(Some(links)), order_post(OrderInput::Body)]), 1);
}

#[test]
fn body_value_mismatch_is_kept() {
    let links = json!({"CreateOrder": {"operationId": "createOrder", "requestBody": {"customer_id": "$response.body#/name"}}});
    assert_eq!(injected(vec![customer_post(Some(links)), order_post(OrderInput::Body)]), 1);
}

#[test]
fn injected_body_link_shape() {
    let paths: Map<String, Value> = vec![customer_post(None), order_post(OrderInput::Body)]
        .into_iter()
        .collect();
    let mut api = ApiSchema::from_value(json!({"openapi": "3.0.0", "paths": paths})).unwrap();
    let graph = analyze(&api);
    assert_eq!(inject_links(&mut api, &graph), 1);
    assert_eq!(
        api.raw()["paths"]["/customers"]["post"]["responses"]["201"]["links"]["PostCustomer"],
        json!({
            "operationRef": "#/paths/~1orders/post",
            "requestBody": {"customer_id": "$response.body#/id"},
            "x-apichain": {"is_inferred": true, "merge_body": true}
        })
    );
}
