//! GPU post-processing chain.
//!
//! Owns the two full-size ping-pong targets. The scene is rendered into the
//! first; each pass that runs reads the current target, writes the other and
//! swaps. Passes that are at identity record nothing, so a frame without
//! effects presents the scene target directly.

use crate::error::Result;
use crate::gpu::bloom_processor::BloomProcessor;
use crate::gpu::fullscreen::{RenderTarget, HDR_FORMAT};
use crate::gpu::shaders::ShaderProvider;
use crate::gpu::uber_pass::UberPass;
use crate::post_processing::PostProcessingData;

/// Which passes ran and where the result ended up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PostReport {
    /// Index of the target holding the final image.
    pub output: usize,
    pub bloom_applied: bool,
    pub uber_applied: bool,
}

pub struct PostProcessor {
    targets: [RenderTarget; 2],
    bloom: BloomProcessor,
    uber: UberPass,
}

fn create_targets(device: &wgpu::Device, width: u32, height: u32) -> [RenderTarget; 2] {
    let usage = wgpu::TextureUsages::COPY_SRC;
    [
        RenderTarget::new(device, "Post Target A", width, height, HDR_FORMAT, usage),
        RenderTarget::new(device, "Post Target B", width, height, HDR_FORMAT, usage),
    ]
}

/// Target index after a pass: a pass that ran wrote the other target.
fn swap_if(current: usize, applied: bool) -> usize {
    if applied {
        1 - current
    } else {
        current
    }
}

impl PostProcessor {
    pub fn new(device: &wgpu::Device, shaders: &dyn ShaderProvider, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            targets: create_targets(device, width, height),
            bloom: BloomProcessor::new(device, shaders)?,
            uber: UberPass::new(device, shaders)?,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.targets[0].width, self.targets[0].height)
    }

    /// Reallocate the ping-pong targets. The bloom chain follows on its next use.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.size() == (width.max(1), height.max(1)) {
            return;
        }
        log::debug!("Resizing post targets to {}x{}", width, height);
        for target in &self.targets {
            target.destroy();
        }
        self.targets = create_targets(device, width, height);
    }

    pub fn bloom(&self) -> &BloomProcessor {
        &self.bloom
    }

    /// Where the scene pass renders.
    pub fn scene_target(&self) -> &RenderTarget {
        &self.targets[0]
    }

    pub fn target(&self, index: usize) -> &RenderTarget {
        &self.targets[index]
    }

    /// Record bloom then the uber pass, skipping whichever is at identity.
    pub fn run(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        post: &PostProcessingData,
    ) -> PostReport {
        let size = self.size();
        let mut current = 0;

        let (input, output) = (&self.targets[current].view, &self.targets[1 - current].view);
        let bloom_applied = self
            .bloom
            .process(device, queue, encoder, input, output, size, &post.bloom);
        current = swap_if(current, bloom_applied);

        let (input, output) = (&self.targets[current].view, &self.targets[1 - current].view);
        let uber_applied = self.uber.process(device, queue, encoder, input, output, size, post);
        current = swap_if(current, uber_applied);

        PostReport {
            output: current,
            bloom_applied,
            uber_applied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_for(passes: &[bool]) -> usize {
        passes.iter().fold(0, |current, &applied| swap_if(current, applied))
    }

    #[test]
    fn test_no_pass_presents_scene_target() {
        assert_eq!(output_for(&[false, false]), 0);
    }

    #[test]
    fn test_single_pass_lands_in_second_target() {
        assert_eq!(output_for(&[true, false]), 1);
        assert_eq!(output_for(&[false, true]), 1);
    }

    #[test]
    fn test_both_passes_return_to_first_target() {
        assert_eq!(output_for(&[true, true]), 0);
    }
}
