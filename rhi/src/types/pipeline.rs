//! Fixed-function pipeline state.

use serde::Deserialize;

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CullMode {
    /// No culling.
    None,
    /// Cull back faces.
    #[default]
    Back,
    /// Cull front faces.
    Front,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareOp {
    /// Pass if less.
    #[default]
    Less,
    /// Pass if less or equal.
    LessOrEqual,
    /// Pass if greater.
    Greater,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_material_enums() {
        let op: CompareOp = serde_json::from_str("\"LESS_OR_EQUAL\"").unwrap();
        assert_eq!(op, CompareOp::LessOrEqual);
        let cull: CullMode = serde_json::from_str("\"NONE\"").unwrap();
        assert_eq!(cull, CullMode::None);
        assert!(serde_json::from_str::<CullMode>("\"SIDEWAYS\"").is_err());
    }
}
