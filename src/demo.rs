//! Built-in animated scene, used by the CLI when no external scene is wired in.

use std::f32::consts::TAU;

use glam::{Affine2, Vec2};

use crate::draw_list::{DrawItem, DrawList, RenderMode};
use crate::gpu::mesh::Vertex;
use crate::pipeline::RenderResources;
use crate::registry::MeshHandle;
use crate::simulation::SceneSource;
use crate::text::{FontData, TextAlignment, TextHandle};

const BPM: f64 = 120.0;
const CELL: u32 = 16;

/// Triangle fan approximating a circle of radius 0.5 around the origin.
pub fn regular_polygon(sides: u32) -> (Vec<Vertex>, Vec<u32>) {
    let sides = sides.max(3);
    let mut vertices = vec![Vertex::new(0.0, 0.0)];
    vertices.extend((0..sides).map(|i| {
        let angle = i as f32 / sides as f32 * TAU;
        Vertex::new(0.5 * angle.cos(), 0.5 * angle.sin())
    }));
    let indices = (0..sides).flat_map(|i| [0, 1 + i, 1 + (i + 1) % sides]).collect();
    (vertices, indices)
}

/// 16x16 grid atlas where every printable cell holds a rounded block, with a
/// distance field in alpha. Good enough to see text placement and styling.
pub fn block_font() -> FontData {
    let size = CELL * 16;
    let mut pixels = vec![0u8; (size * size * 4) as usize];
    for y in 0..size {
        for x in 0..size {
            let code = (y / CELL) * 16 + x / CELL;
            if code <= 32 || code == 127 {
                continue;
            }
            // Distance to a box inset by 3 pixels, mapped so the edge sits at 0.5.
            let local = Vec2::new((x % CELL) as f32 + 0.5, (y % CELL) as f32 + 0.5) - Vec2::splat(CELL as f32 / 2.0);
            let half = Vec2::splat(CELL as f32 / 2.0 - 3.0);
            let d = (local.abs() - half).max(Vec2::ZERO).length() - 1.0;
            let alpha = (0.5 - d / 6.0).clamp(0.0, 1.0);
            let i = ((y * size + x) * 4) as usize;
            pixels[i..i + 4].copy_from_slice(&[255, 255, 255, (alpha * 255.0) as u8]);
        }
    }
    FontData::new("demo-blocks", size, size, pixels)
}

pub struct DemoScene {
    hexagon: MeshHandle,
    triangle: MeshHandle,
    title: TextHandle,
}

impl DemoScene {
    pub fn new(resources: &RenderResources) -> Self {
        let (vertices, indices) = regular_polygon(6);
        let hexagon = resources.register_mesh(&vertices, &indices);
        let (vertices, indices) = regular_polygon(3);
        let triangle = resources.register_mesh(&vertices, &indices);
        let font = resources.register_font(block_font());
        let title = resources.create_text("BEATFRAME", &[font], TextAlignment::Center);
        Self {
            hexagon,
            triangle,
            title,
        }
    }
}

/// 1.0 on the beat, decaying towards the next one.
fn beat_pulse(time: f64) -> f32 {
    let phase = (time * BPM / 60.0).fract() as f32;
    (1.0 - phase).powi(3)
}

impl SceneSource for DemoScene {
    fn populate(&mut self, time: f64, list: &mut DrawList) -> bool {
        let t = time as f32;
        let pulse = beat_pulse(time);

        list.clear_color = [0.02, 0.02, 0.05, 1.0];
        list.camera.rotation = (t * 0.2).sin() * 0.1;
        list.camera.scale = 1.0 - 0.05 * pulse;

        list.push(
            DrawItem::mesh(
                self.hexagon,
                Affine2::from_scale_angle_translation(Vec2::splat(1.6), t * 0.3, Vec2::ZERO),
                [0.1, 0.1, 0.3, 1.0],
            )
            .with_gradient(RenderMode::RadialOut, [0.2, 0.05, 0.3, 1.0]),
        );

        for i in 0..8 {
            let angle = i as f32 / 8.0 * TAU + t;
            let position = Vec2::new(angle.cos(), angle.sin()) * 0.7;
            list.push(
                DrawItem::mesh(
                    self.triangle,
                    Affine2::from_scale_angle_translation(Vec2::splat(0.2 + 0.1 * pulse), -angle, position),
                    [1.0, 0.4, 0.1, 0.8],
                )
                .with_gradient(RenderMode::LinearRight, [1.0, 0.9, 0.2, 0.8]),
            );
        }

        list.push(DrawItem::text(
            self.title.clone(),
            Affine2::from_scale_angle_translation(Vec2::splat(0.15), 0.0, Vec2::new(0.0, 0.1)),
            [1.0, 1.0, 1.0, 0.9],
        ));

        let post = &mut list.post_processing;
        post.bloom.intensity = 0.4 + 0.8 * pulse;
        post.bloom.threshold = 0.6;
        post.hue_shift = (t * 20.0) % 360.0;
        post.vignette.intensity = 0.35;
        post.chromatic_aberration = 0.004 * pulse;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchAssembler;
    use approx::assert_relative_eq;

    #[test]
    fn test_regular_polygon_fan() {
        let (vertices, indices) = regular_polygon(6);
        assert_eq!(vertices.len(), 7);
        assert_eq!(indices.len(), 18);
        assert_eq!(&indices[15..], &[0, 6, 1]);
        assert_relative_eq!(Vec2::from(vertices[1].position).length(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_beat_pulse_peaks_on_beat() {
        assert_relative_eq!(beat_pulse(0.0), 1.0);
        assert_relative_eq!(beat_pulse(0.5), 1.0);
        assert!(beat_pulse(0.25) < 0.2);
    }

    #[test]
    fn test_demo_scene_assembles() {
        let resources = RenderResources::default();
        let mut scene = DemoScene::new(&resources);
        let mut list = DrawList::new();
        assert!(scene.populate(1.0, &mut list));
        assert_eq!(list.len(), 10);

        let uv_scales = vec![[1.0, 1.0]; resources.fonts().len()];
        let mut assembler = BatchAssembler::new();
        let batch = assembler.assemble(&list, resources.meshes(), &uv_scales, 16.0 / 9.0);
        assert_eq!(batch.opaque_count(), 1);
        assert_eq!(batch.transparent_count(), 9);
        // Eight triangles in one run, then the text.
        assert_eq!(batch.transparent.len(), 2);
        assert!(list.post_processing.bloom.is_active());
    }
}
