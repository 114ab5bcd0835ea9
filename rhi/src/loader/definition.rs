//! Declarative material files.
//!
//! A material file is a JSON object:
//!
//! ```json
//! {
//!   "name": "Skybox",
//!   "shader": "shaders/skybox.glsl",
//!   "version": 1,
//!   "offscreen": true,
//!   "depthCompareOp": "LESS_OR_EQUAL",
//!   "cullMode": "NONE",
//!   "attachments": [
//!     { "loadOperation": "LOAD", "storeOperation": "STORE",
//!       "dependency": { "path": "materials/render.material", "index": 0 } }
//!   ],
//!   "depthAttachment": { "loadOperation": "LOAD", "storeOperation": "STORE",
//!     "dependency": { "path": "materials/render.material", "index": 0 } }
//! }
//! ```
//!
//! A material with a non-null `compute` value is compute-only; its pipeline
//! fields are ignored.

use serde::Deserialize;

use crate::error::MaterialError;
use crate::shader::ShaderType;
use crate::types::{CompareOp, CullMode, LoadOp, StoreOp};

/// Reference to an attachment of another material's render pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDefinition {
    /// Path of the material that owns the texture.
    pub path: String,
    /// Attachment index in that material's pass. For a depth attachment the
    /// index is ignored.
    pub index: usize,
}

/// One attachment of a graphics material.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDefinition {
    pub load_operation: LoadOp,
    pub store_operation: StoreOp,
    /// Reuse another material's texture instead of allocating one.
    #[serde(default)]
    pub dependency: Option<DependencyDefinition>,
}

/// A parsed material file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialDefinition {
    pub name: String,
    /// Shader source path.
    pub shader: String,
    pub version: u32,
    /// Set by any non-null `compute` value, `false` included.
    #[serde(default, deserialize_with = "non_null")]
    pub compute: bool,
    #[serde(default = "default_offscreen")]
    pub offscreen: bool,
    #[serde(default)]
    pub depth_compare_op: CompareOp,
    #[serde(default)]
    pub cull_mode: CullMode,
    #[serde(default)]
    pub attachments: Vec<AttachmentDefinition>,
    #[serde(default)]
    pub depth_attachment: Option<AttachmentDefinition>,
}

fn default_offscreen() -> bool {
    true
}

/// Any value but `null` marks the key as set.
fn non_null<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<serde::de::IgnoredAny>::deserialize(deserializer)?.is_some())
}

impl MaterialDefinition {
    /// Parse the material file at `path` from its contents.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Parse`] for malformed JSON, unknown enum
    /// strings, missing required fields, and an empty name or shader path.
    pub fn parse(path: &str, text: &str) -> Result<Self, MaterialError> {
        let definition: Self = serde_json::from_str(text).map_err(|e| MaterialError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        if definition.name.is_empty() {
            return Err(MaterialError::Parse {
                path: path.to_string(),
                reason: "material name is empty".to_string(),
            });
        }
        if definition.shader.is_empty() {
            return Err(MaterialError::Parse {
                path: path.to_string(),
                reason: "shader path is empty".to_string(),
            });
        }
        Ok(definition)
    }

    /// Program kind, inferred from the shader path.
    pub fn shader_type(&self) -> ShaderType {
        ShaderType::from_path(&self.shader)
    }

    /// Paths of every material this one depends on, in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = &DependencyDefinition> {
        self.attachments
            .iter()
            .chain(self.depth_attachment.iter())
            .filter_map(|attachment| attachment.dependency.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SKYBOX: &str = r#"{
        "name": "Skybox",
        "shader": "shaders/skybox.glsl",
        "version": 1,
        "offscreen": true,
        "depthCompareOp": "LESS_OR_EQUAL",
        "cullMode": "NONE",
        "attachments": [
            { "loadOperation": "LOAD", "storeOperation": "STORE",
              "dependency": { "path": "materials/render.material", "index": 0 } }
        ],
        "depthAttachment": { "loadOperation": "CLEAR", "storeOperation": "UNDEFINED" }
    }"#;

    #[test]
    fn test_parse_graphics_material() {
        let def = MaterialDefinition::parse("skybox.material", SKYBOX).unwrap();
        assert_eq!(def.name, "Skybox");
        assert_eq!(def.shader_type(), ShaderType::Fx);
        assert!(!def.compute);
        assert_eq!(def.depth_compare_op, CompareOp::LessOrEqual);
        assert_eq!(def.cull_mode, CullMode::None);
        assert_eq!(def.attachments.len(), 1);
        assert_eq!(
            def.depth_attachment.as_ref().map(|a| a.load_operation),
            Some(LoadOp::Clear)
        );
        let deps: Vec<_> = def.dependencies().map(|d| d.path.as_str()).collect();
        assert_eq!(deps, ["materials/render.material"]);
    }

    #[rstest]
    #[case::flag(r#", "compute": true"#, true)]
    #[case::object(r#", "compute": {}"#, true)]
    #[case::false_value(r#", "compute": false"#, true)]
    #[case::null(r#", "compute": null"#, false)]
    #[case::absent("", false)]
    fn test_compute_value_marks_compute(#[case] field: &str, #[case] compute: bool) {
        let text = format!(
            r#"{{ "name": "Irradiance", "shader": "shaders/irradiance.comp", "version": 1{field} }}"#
        );
        let def = MaterialDefinition::parse("irradiance.material", &text).unwrap();
        assert_eq!(def.compute, compute);
        assert_eq!(def.shader_type(), ShaderType::Compute);
    }

    #[test]
    fn test_unknown_enum_is_parse_error() {
        let text = SKYBOX.replace("LESS_OR_EQUAL", "ALWAYS");
        let err = MaterialDefinition::parse("skybox.material", &text).unwrap_err();
        assert!(matches!(err, MaterialError::Parse { .. }));
    }

    #[test]
    fn test_missing_version_is_parse_error() {
        let err = MaterialDefinition::parse(
            "a.material",
            r#"{ "name": "A", "shader": "a.glsl" }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = MaterialDefinition::parse(
            "a.material",
            r#"{ "name": "", "shader": "a.glsl", "version": 1 }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("name is empty"));
    }
}
