//! Letterbox / pillarbox placement of the rendered image inside the destination.

/// Pixel rectangle inside the destination surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Largest centered rectangle of `aspect` (width / height) that fits in
/// `width` x `height`. Without an aspect ratio the whole surface is used.
pub fn compute_viewport(width: u32, height: u32, aspect: Option<f32>) -> Viewport {
    let full = Viewport {
        x: 0,
        y: 0,
        width,
        height,
    };
    let Some(aspect) = aspect.filter(|a| a.is_finite() && *a > 0.0) else {
        return full;
    };
    if width == 0 || height == 0 {
        return full;
    }

    let surface_aspect = width as f32 / height as f32;
    if surface_aspect > aspect {
        // Surface is wider: bars left and right.
        let w = ((height as f32 * aspect).round() as u32).clamp(1, width);
        Viewport {
            x: (width - w) / 2,
            y: 0,
            width: w,
            height,
        }
    } else {
        let h = ((width as f32 / aspect).round() as u32).clamp(1, height);
        Viewport {
            x: 0,
            y: (height - h) / 2,
            width,
            height: h,
        }
    }
}
