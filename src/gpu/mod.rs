pub mod backend;
pub mod bloom_processor;
pub mod buffer;
pub mod context;
pub mod font_atlas;
pub mod fullscreen;
pub mod mesh;
pub mod post_processor;
pub mod presenter;
pub mod scene_renderer;
pub mod shaders;
pub mod uber_pass;
