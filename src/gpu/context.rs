//! Adapter and device acquisition.

use crate::error::{RenderError, Result};

/// Optional features that change how draws are issued.
const WANTED_FEATURES: wgpu::Features =
    wgpu::Features::MULTI_DRAW_INDIRECT.union(wgpu::Features::INDIRECT_FIRST_INSTANCE);

/// How the scene renderer can submit its command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawSubmission {
    /// One `multi_draw_indexed_indirect` per run.
    MultiDrawIndirect,
    /// One `draw_indexed_indirect` per command.
    Indirect,
    /// Indirect arguments replayed as direct draws from the CPU copy.
    Direct,
}

impl DrawSubmission {
    pub fn for_features(features: wgpu::Features) -> Self {
        // Every command uses first_instance, so indirect paths need it.
        if !features.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE) {
            DrawSubmission::Direct
        } else if features.contains(wgpu::Features::MULTI_DRAW_INDIRECT) {
            DrawSubmission::MultiDrawIndirect
        } else {
            DrawSubmission::Indirect
        }
    }
}

pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub submission: DrawSubmission,
}

impl GpuContext {
    /// Acquire a device able to present to `surface`, or a headless one when `None`.
    pub async fn new(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("Using adapter '{}' ({:?})", info.name, info.backend);

        let features = adapter.features() & WANTED_FEATURES;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Beatframe Device"),
                    required_features: features,
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let submission = DrawSubmission::for_features(features);
        log::debug!("Draw submission mode: {:?}", submission);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            submission,
        })
    }

    /// Blocking headless constructor for offline rendering and tests.
    pub fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        pollster::block_on(Self::new(instance, None))
    }

    pub fn adapter_name(&self) -> String {
        let info = self.adapter.get_info();
        format!("{} ({:?})", info.name, info.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_mode_selection() {
        assert_eq!(DrawSubmission::for_features(wgpu::Features::empty()), DrawSubmission::Direct);
        assert_eq!(
            DrawSubmission::for_features(wgpu::Features::MULTI_DRAW_INDIRECT),
            DrawSubmission::Direct
        );
        assert_eq!(
            DrawSubmission::for_features(wgpu::Features::INDIRECT_FIRST_INSTANCE),
            DrawSubmission::Indirect
        );
        assert_eq!(DrawSubmission::for_features(WANTED_FEATURES), DrawSubmission::MultiDrawIndirect);
    }
}
