//! The dependency graph: operations, the resources they exchange, and the
//! producer -> consumer links derived from them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::links::LinkDefinition;
use crate::location::ParameterLocation;
use crate::pointer::encode_pointer;
use crate::resource::{Cardinality, OperationMap, ResourceMap};
use crate::schema::OperationKey;

/// Graph of API operations and their resource dependencies.
///
/// Built once per schema by [`analyze`](crate::analyzer::analyze) and
/// read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub operations: OperationMap,
    pub resources: ResourceMap,
}

/// Links synthesized for a single `(producer, status code)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseLinks {
    pub producer: OperationKey,
    pub status_code: String,
    pub links: IndexMap<String, LinkDefinition>,
}

impl ResponseLinks {
    /// OpenAPI representation of the link collection.
    pub fn to_openapi(&self) -> Map<String, Value> {
        self.links
            .iter()
            .map(|(name, link)| (name.clone(), link.to_openapi()))
            .collect()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any operation consumes a resource another operation produces.
    pub fn has_dependencies(&self) -> bool {
        self.operations.iter().any(|(label, consumer)| {
            consumer.inputs.iter().any(|input| {
                self.operations.iter().any(|(other, producer)| {
                    other != label && producer.outputs.iter().any(|output| output.resource == input.resource)
                })
            })
        })
    }

    /// Compact, inspection-friendly JSON form.
    ///
    /// Slots refer to resources by name; resources list their fields and
    /// field types.
    pub fn serialize(&self) -> Value {
        let operations: Map<String, Value> = self
            .operations
            .iter()
            .map(|(label, node)| {
                let inputs: Vec<Value> = node
                    .inputs
                    .iter()
                    .map(|slot| {
                        json!({
                            "resource": slot.resource,
                            "resource_field": slot.resource_field,
                            "parameter_name": slot.parameter_name,
                            "parameter_location": slot.parameter_location,
                        })
                    })
                    .collect();
                let outputs: Vec<Value> = node
                    .outputs
                    .iter()
                    .map(|slot| {
                        json!({
                            "resource": slot.resource,
                            "pointer": slot.pointer,
                            "cardinality": slot.cardinality,
                            "status_code": slot.status_code,
                        })
                    })
                    .collect();
                (label.clone(), json!({"inputs": inputs, "outputs": outputs}))
            })
            .collect();
        let resources: Map<String, Value> = self
            .resources
            .iter()
            .map(|(name, resource)| {
                (
                    name.clone(),
                    json!({"fields": resource.fields, "types": resource.types}),
                )
            })
            .collect();
        json!({"operations": operations, "resources": resources})
    }

    /// OpenAPI links connecting producers to consumers of the same resource.
    ///
    /// For `POST /users` producing `User` and `GET /users/{id}` consuming
    /// `User.id`, this yields a `GetUser` link on the `POST` response that
    /// fills `path.id` from `$response.body#/id`.
    pub fn iter_links(&self) -> impl Iterator<Item = ResponseLinks> + '_ {
        self.operations.values().flat_map(move |producer| {
            producer.outputs.iter().flat_map(move |output| {
                self.operations
                    .values()
                    .filter(move |consumer| !std::ptr::eq(*consumer, producer))
                    .filter_map(move |consumer| {
                        let mut links: IndexMap<String, LinkDefinition> = IndexMap::new();
                        for input in consumer.inputs.iter().filter(|input| input.resource == output.resource) {
                            let pointer = match &input.resource_field {
                                Some(field) => extend_pointer(&output.pointer, field, output.cardinality),
                                None => output.pointer.clone(),
                            };
                            let expression = format!("$response.body#{pointer}");
                            let name = format!("{}{}", capitalize(&consumer.method), input.resource);
                            let link = links.entry(name).or_insert_with(|| LinkDefinition {
                                operation_ref: OperationKey::new(&consumer.method, &consumer.path)
                                    .operation_ref(),
                                parameters: IndexMap::new(),
                                request_body: None,
                            });
                            if input.parameter_location == ParameterLocation::Body {
                                let expression = Value::String(expression);
                                if input.is_array_item() {
                                    link.request_body = Some(Value::Array(vec![expression]));
                                } else if let Some(Value::Object(body)) = &mut link.request_body {
                                    body.insert(input.parameter_name.clone(), expression);
                                } else {
                                    let body = Map::from_iter([(input.parameter_name.clone(), expression)]);
                                    link.request_body = Some(Value::Object(body));
                                }
                            } else {
                                link.parameters.insert(
                                    input.parameter_location.qualify(&input.parameter_name),
                                    expression,
                                );
                            }
                        }
                        (!links.is_empty()).then(|| ResponseLinks {
                            producer: OperationKey::new(&producer.method, &producer.path),
                            status_code: output.status_code.clone(),
                            links,
                        })
                    })
            })
        })
    }
}

/// Pointer to `field` of the resource at `base`; collections point at
/// their first element.
pub fn extend_pointer(base: &str, field: &str, cardinality: Cardinality) -> String {
    let mut pointer = base.to_string();
    if !pointer.ends_with('/') {
        pointer.push('/');
    }
    if cardinality == Cardinality::Many {
        pointer.push_str("0/");
    }
    pointer.push_str(&encode_pointer(field));
    pointer
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}
