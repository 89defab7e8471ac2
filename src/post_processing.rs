//! Per-frame post-processing parameters.
//!
//! Every effect is the identity when its intensity is zero. The GPU chain uses
//! the `is_active` predicates here to skip whole passes.

/// Bloom parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomSettings {
    pub intensity: f32,
    /// Normalized scatter amount in [0, 1], mapped onto [`MIN_SCATTER`, `MAX_SCATTER`].
    pub diffusion: f32,
    /// Brightness above which pixels start to bloom.
    pub threshold: f32,
    /// Width of the soft knee around the threshold, relative to it.
    pub soft_knee: f32,
}

/// Lower bound of the upsample scatter factor.
pub const MIN_SCATTER: f32 = 0.05;
/// Upper bound of the upsample scatter factor.
pub const MAX_SCATTER: f32 = 0.95;

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            intensity: 0.0,
            diffusion: 0.7,
            threshold: 0.9,
            soft_knee: 0.5,
        }
    }
}

impl BloomSettings {
    pub fn is_active(&self) -> bool {
        self.intensity > 0.0
    }

    /// Scatter factor used when blending an upsampled mip into the next level.
    pub fn scatter(&self) -> f32 {
        let t = self.diffusion.clamp(0.0, 1.0);
        MIN_SCATTER + (MAX_SCATTER - MIN_SCATTER) * t
    }

    /// Soft-knee threshold curve: `(threshold - knee, 2 * knee, 0.25 / knee)`.
    pub fn knee_curve(&self) -> [f32; 3] {
        let threshold = self.threshold.max(0.0);
        let knee = threshold * self.soft_knee.clamp(0.0, 1.0) + 1e-5;
        [threshold - knee, knee * 2.0, 0.25 / knee]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LensDistortionSettings {
    /// Signed strength; positive is barrel, negative is pincushion.
    pub intensity: f32,
    /// Distortion center in UV space.
    pub center: [f32; 2],
}

impl Default for LensDistortionSettings {
    fn default() -> Self {
        Self {
            intensity: 0.0,
            center: [0.5, 0.5],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VignetteSettings {
    pub intensity: f32,
    /// Keep the vignette circular regardless of aspect ratio.
    pub rounded: bool,
    pub roundness: f32,
    pub smoothness: f32,
    pub color: [f32; 3],
    pub center: [f32; 2],
}

impl Default for VignetteSettings {
    fn default() -> Self {
        Self {
            intensity: 0.0,
            rounded: false,
            roundness: 1.0,
            smoothness: 0.2,
            color: [0.0; 3],
            center: [0.5, 0.5],
        }
    }
}

/// How the gradient overlay is blended over the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum GradientBlendMode {
    #[default]
    Linear = 0,
    Additive = 1,
    Multiply = 2,
    Screen = 3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradientSettings {
    pub color1: [f32; 4],
    pub color2: [f32; 4],
    pub intensity: f32,
    /// Gradient direction in radians.
    pub rotation: f32,
    pub mode: GradientBlendMode,
}

impl Default for GradientSettings {
    fn default() -> Self {
        Self {
            color1: [0.0, 0.8, 0.56, 0.5],
            color2: [0.81, 0.37, 1.0, 0.5],
            intensity: 0.0,
            rotation: 0.0,
            mode: GradientBlendMode::Linear,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlitchSettings {
    pub intensity: f32,
    pub speed: f32,
    /// Height of displaced bands, in UV units.
    pub size: f32,
}

impl Default for GlitchSettings {
    fn default() -> Self {
        Self {
            intensity: 0.0,
            speed: 1.0,
            size: 0.05,
        }
    }
}

/// All post-processing parameters for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PostProcessingData {
    /// Scene time in seconds, drives animated effects (glitch).
    pub time: f32,
    pub bloom: BloomSettings,
    /// Hue rotation in degrees.
    pub hue_shift: f32,
    pub lens_distortion: LensDistortionSettings,
    pub chromatic_aberration: f32,
    pub vignette: VignetteSettings,
    pub gradient: GradientSettings,
    pub glitch: GlitchSettings,
}

impl PostProcessingData {
    /// True when the fused uber pass would change at least one pixel.
    pub fn uber_active(&self) -> bool {
        self.hue_shift != 0.0
            || self.lens_distortion.intensity != 0.0
            || self.chromatic_aberration != 0.0
            || self.vignette.intensity > 0.0
            || self.gradient.intensity > 0.0
            || self.glitch.intensity > 0.0
    }

    /// True when neither bloom nor the uber pass has any work to do.
    pub fn is_identity(&self) -> bool {
        !self.bloom.is_active() && !self.uber_active()
    }
}
