//! Read/write access to a raw OpenAPI or Swagger document.
//!
//! [`ApiSchema`] is deliberately thin: it enumerates operations, follows
//! local `$ref`s, finds operations by `operationId` / `operationRef`, and
//! hands out the mutable link collection of a response so inferred links can
//! be written back next to the author's own. Everything else about schema
//! loading (remote references, bundling, validation) belongs to the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::location::ParameterLocation;
use crate::pointer::{decode_pointer, encode_pointer};

/// HTTP methods that may appear as keys of a path item.
pub const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Which flavour of document we are looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    Swagger2,
    OpenApi3,
}

/// Identity of an operation inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationKey {
    /// Lower-case HTTP method.
    pub method: String,
    /// Path template, e.g. `/users/{userId}`.
    pub path: String,
}

impl OperationKey {
    pub fn new(method: &str, path: &str) -> Self {
        OperationKey {
            method: method.to_lowercase(),
            path: path.to_string(),
        }
    }

    /// Stable operation label: `"METHOD /path"`.
    pub fn label(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }

    /// Local `operationRef` pointing at this operation.
    pub fn operation_ref(&self) -> String {
        format!("#/paths/{}/{}", encode_pointer(&self.path), self.method)
    }
}

/// A non-body operation input.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Value,
}

/// The request body of an operation, reduced to a single media type.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub media_type: String,
    pub required: bool,
    pub schema: Value,
}

impl RequestBody {
    pub fn is_json(&self) -> bool {
        is_json_media_type(&self.media_type)
    }
}

/// One declared response of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDefinition {
    /// Status code key as written in the document (`201`, `2XX`, `default`).
    pub status_code: String,
    /// Raw (unresolved) schema of the response payload, if any.
    pub schema: Option<Value>,
    /// Names of declared response headers.
    pub headers: Vec<String>,
}

impl ResponseDefinition {
    pub fn is_successful(&self) -> bool {
        self.status_code.starts_with('2')
    }
}

/// A single API operation, as consumed by the dependency analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub parameters: Vec<Parameter>,
    pub body: Option<RequestBody>,
    pub responses: Vec<ResponseDefinition>,
}

impl Operation {
    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.method, &self.path)
    }

    pub fn label(&self) -> String {
        self.key().label()
    }

    pub fn successful_responses(&self) -> impl Iterator<Item = &ResponseDefinition> {
        self.responses.iter().filter(|response| response.is_successful())
    }

    pub fn get_parameter(&self, location: ParameterLocation, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|parameter| parameter.location == location && parameter.name == name)
    }

    /// Finds a parameter by bare name, regardless of its location.
    pub fn find_parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }
}

/// A raw API document plus the helpers needed by dependency inference.
#[derive(Debug, Clone)]
pub struct ApiSchema {
    raw: Value,
    version: SpecVersion,
}

impl ApiSchema {
    /// Wraps a parsed JSON document.
    ///
    /// The document must be an object declaring either `openapi` or
    /// `swagger`, with a `paths` object.
    pub fn from_value(raw: Value) -> Result<Self, SchemaError> {
        let object = raw.as_object().ok_or_else(|| SchemaError::InvalidDocument {
            reason: "expected a JSON object".to_string(),
        })?;
        let version = if object.contains_key("openapi") {
            SpecVersion::OpenApi3
        } else if object.contains_key("swagger") {
            SpecVersion::Swagger2
        } else {
            return Err(SchemaError::InvalidDocument {
                reason: "missing 'openapi' or 'swagger' version field".to_string(),
            });
        };
        if !object.get("paths").is_some_and(Value::is_object) {
            return Err(SchemaError::InvalidDocument {
                reason: "'paths' must be an object".to_string(),
            });
        }
        Ok(ApiSchema { raw, version })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }

    pub fn version(&self) -> SpecVersion {
        self.version
    }

    /// Name of the response field holding links.
    pub fn links_field(&self) -> &'static str {
        match self.version {
            SpecVersion::OpenApi3 => "links",
            SpecVersion::Swagger2 => "x-links",
        }
    }

    // -----------------------------------------------------------------------
    // Reference resolution
    // -----------------------------------------------------------------------

    /// Follows `$ref` chains until a non-reference value is reached.
    pub fn resolve<'a>(&'a self, value: &'a Value) -> Result<&'a Value, SchemaError> {
        let mut current = value;
        let mut seen: Vec<&str> = Vec::new();
        while let Some(reference) = current.get("$ref").and_then(Value::as_str) {
            if seen.contains(&reference) {
                return Err(SchemaError::RecursiveReference {
                    reference: reference.to_string(),
                });
            }
            seen.push(reference);
            current = self.lookup_reference(reference)?;
        }
        Ok(current)
    }

    /// Looks up a single local reference such as `#/components/schemas/User`.
    pub fn lookup_reference(&self, reference: &str) -> Result<&Value, SchemaError> {
        reference
            .strip_prefix('#')
            .and_then(|pointer| self.raw.pointer(pointer))
            .ok_or_else(|| SchemaError::UnresolvableReference {
                reference: reference.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Keys of every operation in document order.
    pub fn operation_keys(&self) -> Vec<OperationKey> {
        let mut keys = Vec::new();
        for (path, item) in self.paths() {
            let Ok(item) = self.resolve(item) else {
                continue;
            };
            for method in HTTP_METHODS {
                if item.get(method).is_some() {
                    keys.push(OperationKey::new(method, path));
                }
            }
        }
        keys
    }

    /// Every operation in document order; broken ones are reported as errors.
    pub fn operations(&self) -> Vec<Result<Operation, SchemaError>> {
        let mut operations = Vec::new();
        for (path, item) in self.paths() {
            let item = match self.resolve(item) {
                Ok(item) => item,
                Err(err) => {
                    operations.push(Err(err));
                    continue;
                }
            };
            for method in HTTP_METHODS {
                if let Some(definition) = item.get(method) {
                    operations.push(self.build_operation(path, item, method, definition));
                }
            }
        }
        operations
    }

    /// Builds a single operation by key.
    pub fn operation(&self, key: &OperationKey) -> Option<Result<Operation, SchemaError>> {
        let item = self.raw.get("paths")?.get(&key.path)?;
        let item = match self.resolve(item) {
            Ok(item) => item,
            Err(err) => return Some(Err(err)),
        };
        let definition = item.get(&key.method)?;
        Some(self.build_operation(&key.path, item, &key.method, definition))
    }

    /// Finds the operation declaring the given `operationId`.
    pub fn find_by_operation_id(&self, operation_id: &str) -> Option<OperationKey> {
        self.operation_keys().into_iter().find(|key| {
            self.operation_definition(key)
                .and_then(|definition| definition.get("operationId"))
                .and_then(Value::as_str)
                == Some(operation_id)
        })
    }

    /// Finds the operation addressed by a local `operationRef`.
    pub fn find_by_reference(&self, reference: &str) -> Option<OperationKey> {
        let rest = reference.strip_prefix("#/paths/")?;
        let (encoded_path, method) = rest.rsplit_once('/')?;
        let key = OperationKey::new(method, &decode_pointer(encoded_path));
        self.operation_definition(&key).map(|_| key)
    }

    fn paths(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.raw
            .get("paths")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|paths| paths.iter())
    }

    fn operation_definition(&self, key: &OperationKey) -> Option<&Value> {
        let item = self.raw.get("paths")?.get(&key.path)?;
        self.resolve(item).ok()?.get(&key.method)
    }

    fn build_operation(
        &self,
        path: &str,
        item: &Value,
        method: &str,
        definition: &Value,
    ) -> Result<Operation, SchemaError> {
        let key = OperationKey::new(method, path);
        let invalid = |reason: &str| SchemaError::InvalidOperation {
            label: key.label(),
            reason: reason.to_string(),
        };
        let definition = self.resolve(definition)?;
        let object = definition
            .as_object()
            .ok_or_else(|| invalid("operation definition is not an object"))?;

        let mut parameters: Vec<Parameter> = Vec::new();
        let mut body = None;

        // Path-level parameters first; operation-level ones override them.
        let shared = item.get("parameters").and_then(Value::as_array);
        let own = object.get("parameters").and_then(Value::as_array);
        for raw_parameter in shared.into_iter().flatten().chain(own.into_iter().flatten()) {
            let resolved = self.resolve(raw_parameter)?;
            let name = resolved
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("parameter without a name"))?;
            let location_name = resolved
                .get("in")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("parameter without a location"))?;
            if location_name == "formData" {
                continue;
            }
            let location = ParameterLocation::from_name(location_name)
                .ok_or_else(|| invalid(&format!("unknown parameter location '{location_name}'")))?;
            let required = resolved
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(location == ParameterLocation::Path);

            if location == ParameterLocation::Body {
                body = Some(RequestBody {
                    media_type: "application/json".to_string(),
                    required,
                    schema: resolved.get("schema").cloned().unwrap_or(Value::Bool(true)),
                });
                continue;
            }

            let parameter = Parameter {
                name: name.to_string(),
                location,
                required,
                schema: parameter_schema(resolved),
            };
            match parameters
                .iter_mut()
                .find(|existing| existing.name == name && existing.location == location)
            {
                Some(existing) => *existing = parameter,
                None => parameters.push(parameter),
            }
        }

        if let Some(raw_body) = object.get("requestBody") {
            let resolved = self.resolve(raw_body)?;
            let required = resolved
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if let Some((media_type, media)) = resolved
                .get("content")
                .and_then(Value::as_object)
                .and_then(pick_media_type)
            {
                body = Some(RequestBody {
                    media_type: media_type.clone(),
                    required,
                    schema: media.get("schema").cloned().unwrap_or(Value::Bool(true)),
                });
            }
        }

        let mut responses = Vec::new();
        if let Some(declared) = object.get("responses").and_then(Value::as_object) {
            for (status_code, raw_response) in declared {
                let resolved = self.resolve(raw_response)?;
                let schema = match self.version {
                    SpecVersion::Swagger2 => resolved.get("schema").cloned(),
                    SpecVersion::OpenApi3 => resolved
                        .get("content")
                        .and_then(Value::as_object)
                        .and_then(pick_media_type)
                        .and_then(|(_, media)| media.get("schema").cloned()),
                };
                let headers = resolved
                    .get("headers")
                    .and_then(Value::as_object)
                    .map(|headers| headers.keys().cloned().collect())
                    .unwrap_or_default();
                responses.push(ResponseDefinition {
                    status_code: status_code.clone(),
                    schema,
                    headers,
                });
            }
        }

        Ok(Operation {
            method: key.method.clone(),
            path: key.path.clone(),
            operation_id: object
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string),
            parameters,
            body,
            responses,
        })
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Declared links of every response of an operation, keyed by status code.
    pub fn response_links(&self, key: &OperationKey) -> Vec<(String, Map<String, Value>)> {
        let Some(responses) = self
            .operation_definition(key)
            .and_then(|definition| self.resolve(definition).ok())
            .and_then(|definition| definition.get("responses"))
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };
        let mut result = Vec::new();
        for (status_code, response) in responses {
            let Ok(response) = self.resolve(response) else {
                continue;
            };
            if let Some(links) = response.get(self.links_field()).and_then(Value::as_object) {
                result.push((status_code.clone(), links.clone()));
            }
        }
        result
    }

    /// Mutable link collection of a response, created on demand.
    ///
    /// A response defined through `$ref` is inlined first so that links
    /// written here do not leak into other operations sharing the component.
    pub fn response_links_mut(
        &mut self,
        key: &OperationKey,
        status_code: &str,
    ) -> Option<&mut Map<String, Value>> {
        let links_field = self.links_field();
        let pointer = format!(
            "/paths/{}/{}/responses/{}",
            encode_pointer(&key.path),
            key.method,
            encode_pointer(status_code)
        );
        let inlined = match self.raw.pointer(&pointer) {
            Some(response) if response.get("$ref").is_some() => {
                Some(self.resolve(response).ok()?.clone())
            }
            _ => None,
        };

        let operation = self
            .raw
            .get_mut("paths")?
            .get_mut(&key.path)?
            .get_mut(&key.method)?
            .as_object_mut()?;
        let responses = operation
            .entry("responses")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()?;
        let response = responses.entry(status_code.to_string()).or_insert_with(|| {
            let mut response = Map::new();
            response.insert(
                "description".to_string(),
                Value::String(String::new()),
            );
            Value::Object(response)
        });
        if let Some(inlined) = inlined {
            *response = inlined;
        }
        response
            .as_object_mut()?
            .entry(links_field)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
    }
}

pub fn is_json_media_type(media_type: &str) -> bool {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json") || essence.ends_with("/json")
}

/// Prefers a JSON media type, falling back to the first declared one.
fn pick_media_type(content: &Map<String, Value>) -> Option<(&String, &Value)> {
    content
        .iter()
        .find(|(media_type, _)| is_json_media_type(media_type))
        .or_else(|| content.iter().next())
}

/// Swagger 2 keeps the schema inline with the parameter; OpenAPI 3 nests it.
fn parameter_schema(parameter: &Value) -> Value {
    if let Some(schema) = parameter.get("schema") {
        return schema.clone();
    }
    let mut schema = Map::new();
    if let Some(object) = parameter.as_object() {
        for (key, value) in object {
            if !matches!(key.as_str(), "name" | "in" | "required" | "description") {
                schema.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(schema)
}
