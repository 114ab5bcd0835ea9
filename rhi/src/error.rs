//! Error types for the rendering backend.
//!
//! Two families of errors exist:
//!
//! - [`GraphicsError`] is returned by device and backend operations.
//! - [`MaterialError`] describes why a material load ended in the
//!   [`Failed`](crate::resource::ResourceStatus::Failed) state.
//!
//! Contract violations (invalid slots, binding an unsynced material, duplicate
//! reflection slots) are not errors: they panic.

use std::fmt;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// An internal error occurred.
    Internal(String),
    /// The surface is outdated and needs to be reconfigured.
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated.
    SurfaceLost,
    /// Shader compilation or module creation failed.
    ShaderCompilationFailed(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::SurfaceOutdated => write!(f, "surface outdated, needs reconfiguration"),
            Self::SurfaceLost => write!(f, "surface lost, needs recreation"),
            Self::ShaderCompilationFailed(msg) => write!(f, "shader compilation failed: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

/// Reasons a material load can fail.
///
/// These are recoverable: the affected resource is marked failed and the
/// error is logged, callers observe it through the resource status.
#[derive(Debug)]
pub enum MaterialError {
    /// The material file could not be read.
    Source { path: String, reason: String },
    /// The material definition is malformed.
    Parse { path: String, reason: String },
    /// The shader could not be compiled or created.
    Shader { path: String, source: GraphicsError },
    /// A reflected uniform buffer has no registered layout, or its size
    /// does not match the registration.
    Layout { buffer: String, reason: String },
    /// A dependency could not be resolved.
    Dependency { path: String, reason: String },
    /// The device rejected a resource request.
    Device(GraphicsError),
    /// A contract violation (for example conflicting shader reflection)
    /// stopped the load.
    Aborted { path: String, reason: String },
}

impl fmt::Display for MaterialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { path, reason } => write!(f, "can't read material '{path}': {reason}"),
            Self::Parse { path, reason } => write!(f, "can't parse material '{path}': {reason}"),
            Self::Shader { path, source } => write!(f, "shader '{path}': {source}"),
            Self::Layout { buffer, reason } => write!(f, "buffer layout '{buffer}': {reason}"),
            Self::Dependency { path, reason } => write!(f, "dependency '{path}': {reason}"),
            Self::Device(err) => write!(f, "device error: {err}"),
            Self::Aborted { path, reason } => write!(f, "load of '{path}' aborted: {reason}"),
        }
    }
}

impl std::error::Error for MaterialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shader { source, .. } => Some(source),
            Self::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphicsError> for MaterialError {
    fn from(err: GraphicsError) -> Self {
        Self::Device(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");
    }

    #[test]
    fn test_material_error_source() {
        use std::error::Error;

        let err = MaterialError::from(GraphicsError::DeviceLost);
        assert_eq!(err.to_string(), "device error: GPU device lost");
        assert!(err.source().is_some());

        let err = MaterialError::Parse {
            path: "a.material".into(),
            reason: "missing field `name`".into(),
        };
        assert!(err.source().is_none());
    }
}
