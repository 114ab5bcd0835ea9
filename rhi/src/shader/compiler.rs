//! Interface to the external shader compiler.

use crate::error::GraphicsError;

use super::{ShaderReflection, ShaderStage, ShaderType};

/// Compiled code and reflection of one stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// The stage.
    pub stage: ShaderStage,
    /// SPIR-V words.
    pub spirv: Vec<u32>,
    /// Reflection of this stage alone.
    pub reflection: ShaderReflection,
}

/// Output of compiling one shader source file.
#[derive(Debug, Clone, Default)]
pub struct CompiledShader {
    /// One entry per stage of the program.
    pub stages: Vec<StageOutput>,
}

impl CompiledShader {
    /// Add a stage.
    pub fn with_stage(
        mut self,
        stage: ShaderStage,
        spirv: Vec<u32>,
        reflection: ShaderReflection,
    ) -> Self {
        self.stages.push(StageOutput {
            stage,
            spirv,
            reflection,
        });
        self
    }
}

/// Turns shader source files into SPIR-V and reflection metadata.
///
/// Implementations wrap an offline or runtime GLSL compiler. The material
/// loader calls `compile` from the render thread, once per distinct shader
/// path.
pub trait ShaderCompiler: Send + Sync + 'static {
    /// Compile every stage of the program at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::ShaderCompilationFailed`] if the source can't
    /// be read or compiled.
    fn compile(&self, path: &str, shader_type: ShaderType)
    -> Result<CompiledShader, GraphicsError>;
}
