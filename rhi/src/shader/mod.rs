//! Shaders, their reflection metadata, and the compiler interface.
//!
//! Shader source is never parsed here. A [`ShaderCompiler`] turns a source
//! path into per-stage SPIR-V plus a [`ShaderReflection`] for each stage; the
//! stage reflections are merged into one description of the shader's
//! binding interface, which drives descriptor layouts, material slot
//! population and texture write layouts.

mod compiler;
mod layouts;
mod reflection;

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::backend::GpuShader;

pub use compiler::{CompiledShader, ShaderCompiler, StageOutput};
pub use layouts::{BufferLayout, BufferLayoutRegistry};
pub use reflection::{
    BufferKind, PushConstantBlock, ReflectedBuffer, ReflectedTexture, ShaderReflection,
    VertexAttribute, VertexInputLayout,
};

/// A single programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
    /// Compute stage.
    Compute,
}

impl ShaderStage {
    /// The flag for this stage.
    pub fn flag(self) -> ShaderStageFlags {
        match self {
            Self::Vertex => ShaderStageFlags::VERTEX,
            Self::Fragment => ShaderStageFlags::FRAGMENT,
            Self::Compute => ShaderStageFlags::COMPUTE,
        }
    }
}

bitflags! {
    /// Set of shader stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStageFlags: u32 {
        /// Vertex stage.
        const VERTEX = 1 << 0;
        /// Fragment stage.
        const FRAGMENT = 1 << 1;
        /// Compute stage.
        const COMPUTE = 1 << 2;
        /// Vertex and fragment stages.
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Kind of shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    /// Vertex + fragment program.
    Fx,
    /// Compute program.
    Compute,
}

impl ShaderType {
    /// Infer the program kind from a shader source path.
    ///
    /// `.glsl` files hold vertex + fragment programs, everything else is
    /// treated as a compute program.
    pub fn from_path(path: &str) -> Self {
        let is_glsl = std::path::Path::new(path)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("glsl"));
        if is_glsl { Self::Fx } else { Self::Compute }
    }

    /// The stages a program of this kind is made of.
    pub fn stages(self) -> &'static [ShaderStage] {
        match self {
            Self::Fx => &[ShaderStage::Vertex, ShaderStage::Fragment],
            Self::Compute => &[ShaderStage::Compute],
        }
    }
}

/// Process-unique identity of a created shader.
///
/// Pipelines are cached per shader identity, so two shaders compiled from
/// the same source are still distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u64);

impl ShaderId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// SPIR-V for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinary {
    /// The stage this code runs in.
    pub stage: ShaderStage,
    /// SPIR-V words.
    pub spirv: Vec<u32>,
}

/// Everything needed to create a [`Shader`].
#[derive(Debug, Clone)]
pub struct ShaderDescriptor {
    /// Debug name, usually the owning material's name.
    pub name: String,
    /// Source path the shader was compiled from.
    pub path: String,
    /// Program kind.
    pub shader_type: ShaderType,
    /// Merged reflection of all stages.
    pub reflection: ShaderReflection,
    /// Code per stage.
    pub binaries: Vec<ShaderBinary>,
}

impl ShaderDescriptor {
    /// Build a descriptor from compiler output, merging stage reflections.
    ///
    /// # Panics
    ///
    /// Panics if two stages claim the same slot for different resources.
    pub fn from_compiled(
        name: impl Into<String>,
        path: impl Into<String>,
        shader_type: ShaderType,
        compiled: CompiledShader,
    ) -> Self {
        let path = path.into();
        let mut reflection = ShaderReflection::default();
        let mut binaries = Vec::with_capacity(compiled.stages.len());
        for output in compiled.stages {
            reflection.merge(output.stage, output.reflection, &path);
            binaries.push(ShaderBinary {
                stage: output.stage,
                spirv: output.spirv,
            });
        }
        Self {
            name: name.into(),
            path,
            shader_type,
            reflection,
            binaries,
        }
    }

    /// Code for the given stage, if present.
    pub fn binary(&self, stage: ShaderStage) -> Option<&ShaderBinary> {
        self.binaries.iter().find(|b| b.stage == stage)
    }
}

/// A shader created on the device.
pub struct Shader {
    id: ShaderId,
    descriptor: ShaderDescriptor,
    gpu_handle: GpuShader,
}

impl Shader {
    pub(crate) fn new(descriptor: ShaderDescriptor, gpu_handle: GpuShader) -> Self {
        Self {
            id: ShaderId::next(),
            descriptor,
            gpu_handle,
        }
    }

    /// Identity used as the pipeline cache key.
    pub fn id(&self) -> ShaderId {
        self.id
    }

    /// The descriptor this shader was created from.
    pub fn descriptor(&self) -> &ShaderDescriptor {
        &self.descriptor
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Program kind.
    pub fn shader_type(&self) -> ShaderType {
        self.descriptor.shader_type
    }

    /// Merged reflection.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.descriptor.reflection
    }

    pub(crate) fn gpu_handle(&self) -> &GpuShader {
        &self.gpu_handle
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("id", &self.id)
            .field("name", &self.descriptor.name)
            .field("path", &self.descriptor.path)
            .field("shader_type", &self.descriptor.shader_type)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Shader: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("shaders/pbr.glsl", ShaderType::Fx)]
    #[case("shaders/POST.GLSL", ShaderType::Fx)]
    #[case("shaders/equirect_to_cubemap.comp", ShaderType::Compute)]
    #[case("shaders/noext", ShaderType::Compute)]
    fn test_shader_type_from_path(#[case] path: &str, #[case] expected: ShaderType) {
        assert_eq!(ShaderType::from_path(path), expected);
    }

    #[test]
    fn test_shader_ids_are_unique() {
        let a = ShaderId::next();
        let b = ShaderId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(
            ShaderStage::Vertex.flag() | ShaderStage::Fragment.flag(),
            ShaderStageFlags::VERTEX_FRAGMENT
        );
        assert_eq!(ShaderType::Compute.stages(), &[ShaderStage::Compute]);
    }
}
