//! Shader source lookup and checked compilation.
//!
//! Pipelines ask for shaders by logical name (`"scene"`, `"post_bloom"`, ...).
//! [`EmbeddedShaders`] serves the sources compiled into the binary;
//! [`DirectoryShaders`] reads `<name>.wgsl` from disk, which makes it possible
//! to iterate on shaders without rebuilding.

use std::borrow::Cow;
use std::future::Future;
use std::path::PathBuf;

use crate::error::{RenderError, Result};

pub const SCENE_SHADER: &str = "scene";
pub const BLOOM_SHADER: &str = "post_bloom";
pub const UBER_SHADER: &str = "post_uber";
pub const BLIT_SHADER: &str = "post_blit";

/// Resolves logical shader names to WGSL source.
pub trait ShaderProvider {
    fn source(&self, name: &str) -> Option<Cow<'static, str>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedShaders;

impl ShaderProvider for EmbeddedShaders {
    fn source(&self, name: &str) -> Option<Cow<'static, str>> {
        let source = match name {
            SCENE_SHADER => include_str!("shader_scene.wgsl"),
            BLOOM_SHADER => include_str!("shader_post_bloom.wgsl"),
            UBER_SHADER => include_str!("shader_post_uber.wgsl"),
            BLIT_SHADER => include_str!("shader_post_blit.wgsl"),
            _ => return None,
        };
        Some(Cow::Borrowed(source))
    }
}

/// Loads `<root>/<name>.wgsl`, falling back to the embedded copy when the
/// file does not exist.
#[derive(Clone, Debug)]
pub struct DirectoryShaders {
    pub root: PathBuf,
}

impl DirectoryShaders {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ShaderProvider for DirectoryShaders {
    fn source(&self, name: &str) -> Option<Cow<'static, str>> {
        let path = self.root.join(format!("{name}.wgsl"));
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                log::debug!("Loaded shader '{}' from {:?}", name, path);
                Some(Cow::Owned(source))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EmbeddedShaders.source(name),
            Err(e) => {
                log::warn!("Failed to read shader {:?}: {}", path, e);
                None
            }
        }
    }
}

fn block_on_scope(future: impl Future<Output = Option<wgpu::Error>>) -> Option<String> {
    pollster::block_on(future).map(|e| e.to_string())
}

/// Compile `name` from `provider`, turning validation errors into
/// [`RenderError::ShaderCompilation`] instead of a device panic.
pub fn compile_shader(
    device: &wgpu::Device,
    provider: &dyn ShaderProvider,
    name: &str,
) -> Result<wgpu::ShaderModule> {
    let source = provider
        .source(name)
        .ok_or_else(|| RenderError::ShaderNotFound(name.to_string()))?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source),
    });
    if let Some(log) = block_on_scope(device.pop_error_scope()) {
        log::error!("Shader '{}' failed to compile:\n{}", name, log);
        return Err(RenderError::ShaderCompilation {
            name: name.to_string(),
            log,
        });
    }
    Ok(module)
}

/// Create a render pipeline under a validation error scope.
pub fn create_render_pipeline_checked(
    device: &wgpu::Device,
    descriptor: &wgpu::RenderPipelineDescriptor<'_>,
) -> Result<wgpu::RenderPipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(descriptor);
    if let Some(log) = block_on_scope(device.pop_error_scope()) {
        let label = descriptor.label.unwrap_or("unnamed").to_string();
        log::error!("Pipeline '{}' failed to link:\n{}", label, log);
        return Err(RenderError::PipelineCreation { label, log });
    }
    Ok(pipeline)
}
