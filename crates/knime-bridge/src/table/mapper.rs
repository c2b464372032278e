//! Mapping between native column type descriptors and KNIME column types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::BridgeError;

/// Column types understood by the Container Input/Output (Table) nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Int,
    Long,
    Double,
    Boolean,
    String,
}

impl EngineType {
    /// Wire tag used in `table-spec`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Int => "int",
            EngineType::Long => "long",
            EngineType::Double => "double",
            EngineType::Boolean => "boolean",
            EngineType::String => "string",
        }
    }

    /// Native descriptor that maps back onto this type via [`map_native_type`].
    pub fn native_dtype(&self) -> &'static str {
        match self {
            EngineType::Int => "int32",
            EngineType::Long => "int64",
            EngineType::Double => "float64",
            EngineType::Boolean => "bool",
            EngineType::String => "object",
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(EngineType::Int),
            "long" => Ok(EngineType::Long),
            "double" => Ok(EngineType::Double),
            "boolean" => Ok(EngineType::Boolean),
            "string" => Ok(EngineType::String),
            other => Err(BridgeError::Format(format!("unknown column type tag '{}'", other))),
        }
    }
}

/// Priority-ordered substring rules. `int64` must be tested before `int`.
const TYPE_RULES: &[(&[&str], EngineType)] = &[
    (&["float"], EngineType::Double),
    (&["int64", "long"], EngineType::Long),
    (&["int"], EngineType::Int),
    (&["bool"], EngineType::Boolean),
];

/// Map a native type descriptor (e.g. `int32`, `float64`, `object`) to a KNIME column type.
///
/// Total: anything that matches no rule is a string column.
pub fn map_native_type(native: &str) -> EngineType {
    let native = native.to_ascii_lowercase();
    TYPE_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| native.contains(needle)))
        .map(|(_, ty)| *ty)
        .unwrap_or(EngineType::String)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_native_type_priority() {
        assert_eq!(map_native_type("float64"), EngineType::Double);
        assert_eq!(map_native_type("float32"), EngineType::Double);
        assert_eq!(map_native_type("int64"), EngineType::Long);
        assert_eq!(map_native_type("long"), EngineType::Long);
        assert_eq!(map_native_type("int32"), EngineType::Int);
        assert_eq!(map_native_type("uint8"), EngineType::Int);
        assert_eq!(map_native_type("bool"), EngineType::Boolean);
        assert_eq!(map_native_type("object"), EngineType::String);
        assert_eq!(map_native_type("datetime64[ns]"), EngineType::String);
        assert_eq!(map_native_type(""), EngineType::String);
    }

    #[test]
    fn test_map_native_type_case_insensitive() {
        assert_eq!(map_native_type("Int64"), EngineType::Long);
        assert_eq!(map_native_type("BOOLEAN"), EngineType::Boolean);
    }

    #[test]
    fn test_native_dtype_maps_back() {
        for ty in [
            EngineType::Int,
            EngineType::Long,
            EngineType::Double,
            EngineType::Boolean,
            EngineType::String,
        ] {
            assert_eq!(map_native_type(ty.native_dtype()), ty);
        }
    }

    #[test]
    fn test_engine_type_tags() {
        assert_eq!("long".parse::<EngineType>().unwrap(), EngineType::Long);
        assert!("localdate".parse::<EngineType>().is_err());
        assert_eq!(EngineType::Boolean.to_string(), "boolean");
        assert_eq!(serde_json::to_string(&EngineType::Double).unwrap(), "\"double\"");
    }
}
