pub mod batch;
pub mod camera;
pub mod config;
pub mod demo;
pub mod draw_list;
pub mod error;
pub mod frame_queue;
pub mod gpu;
pub mod growable_buffer;
pub mod pipeline;
pub mod post_processing;
pub mod registry;
pub mod simulation;
pub mod sink;
pub mod text;
pub mod viewport;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;
#[cfg(not(target_arch = "wasm32"))]
pub mod export;
#[cfg(not(target_arch = "wasm32"))]
pub mod video_encode;
