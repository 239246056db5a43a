//! Where an operation input lives inside an HTTP request.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of an operation input.
///
/// The string form (`path`, `query`, ...) is the prefix used by
/// location-qualified link parameters such as `path.userId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl ParameterLocation {
    /// All locations that can be addressed by a link parameter key.
    pub const ALL: [ParameterLocation; 5] = [
        ParameterLocation::Path,
        ParameterLocation::Query,
        ParameterLocation::Header,
        ParameterLocation::Cookie,
        ParameterLocation::Body,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Query => "query",
            ParameterLocation::Header => "header",
            ParameterLocation::Cookie => "cookie",
            ParameterLocation::Body => "body",
        }
    }

    /// Parses the `in` value of a parameter or the prefix of a link key.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            "cookie" => Some(ParameterLocation::Cookie),
            "body" => Some(ParameterLocation::Body),
            _ => None,
        }
    }

    /// Builds the location-qualified key used in link parameter maps.
    pub fn qualify(&self, name: &str) -> String {
        format!("{}.{}", self.as_str(), name)
    }

    /// Splits a `location.name` key. Returns `None` for bare names.
    pub fn split_qualified(key: &str) -> Option<(ParameterLocation, &str)> {
        let (prefix, name) = key.split_once('.')?;
        let location = ParameterLocation::from_name(prefix)?;
        Some((location, name))
    }
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
