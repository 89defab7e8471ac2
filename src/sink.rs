//! Destination for frames read back from the GPU.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Row order expected by the consumer of a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowOrder {
    /// First row is the top of the image (PNG, raw video).
    #[default]
    TopDown,
    /// First row is the bottom of the image (BMP, OpenGL-style readers).
    BottomUp,
}

/// One tightly packed RGBA8 frame.
#[derive(Clone, Debug)]
pub struct FrameImage {
    pub index: u64,
    /// Scene time the frame was evaluated at.
    pub time: f64,
    pub width: u32,
    pub height: u32,
    pub row_order: RowOrder,
    pub pixels: Vec<u8>,
}

impl FrameImage {
    /// RGBA of the pixel at (`x`, `y`), `y` counted from the top.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let row = match self.row_order {
            RowOrder::TopDown => y,
            RowOrder::BottomUp => self.height - 1 - y,
        };
        let i = ((row * self.width + x) * 4) as usize;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]
    }

    /// Pixels with the first row at the top, flipping only when needed.
    pub fn top_down_pixels(&self) -> Cow<'_, [u8]> {
        match self.row_order {
            RowOrder::TopDown => Cow::Borrowed(&self.pixels),
            RowOrder::BottomUp => {
                let row_len = self.width as usize * 4;
                Cow::Owned(self.pixels.chunks_exact(row_len).rev().flatten().copied().collect())
            }
        }
    }
}

pub trait FrameSink {
    fn write_frame(&mut self, frame: &FrameImage) -> Result<()>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<FrameImage>,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &FrameImage) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }
}

/// Forwards every frame to each inner sink in turn.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn FrameSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn FrameSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl FrameSink for FanoutSink {
    fn write_frame(&mut self, frame: &FrameImage) -> Result<()> {
        self.sinks.iter_mut().try_for_each(|sink| sink.write_frame(frame))
    }

    fn finish(&mut self) -> Result<()> {
        self.sinks.iter_mut().try_for_each(|sink| sink.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_respects_row_order() {
        // 1x2 image: top red, bottom blue.
        let top_down = FrameImage {
            index: 0,
            time: 0.0,
            width: 1,
            height: 2,
            row_order: RowOrder::TopDown,
            pixels: vec![255, 0, 0, 255, 0, 0, 255, 255],
        };
        assert_eq!(top_down.pixel(0, 0), [255, 0, 0, 255]);

        let bottom_up = FrameImage {
            row_order: RowOrder::BottomUp,
            pixels: vec![0, 0, 255, 255, 255, 0, 0, 255],
            ..top_down.clone()
        };
        assert_eq!(bottom_up.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(bottom_up.pixel(0, 1), [0, 0, 255, 255]);
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemorySink::default();
        let frame = FrameImage {
            index: 3,
            time: 0.05,
            width: 1,
            height: 1,
            row_order: RowOrder::TopDown,
            pixels: vec![0; 4],
        };
        sink.write_frame(&frame).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(sink.frames[0].index, 3);
    }

    #[test]
    fn test_top_down_pixels_flips_bottom_up() {
        let frame = FrameImage {
            index: 0,
            time: 0.0,
            width: 1,
            height: 2,
            row_order: RowOrder::BottomUp,
            pixels: vec![0, 0, 255, 255, 255, 0, 0, 255],
        };
        assert_eq!(&*frame.top_down_pixels(), &[255, 0, 0, 255, 0, 0, 255, 255]);

        let frame = FrameImage {
            row_order: RowOrder::TopDown,
            ..frame
        };
        assert!(matches!(frame.top_down_pixels(), Cow::Borrowed(_)));
    }

    struct Counting(std::rc::Rc<std::cell::Cell<u32>>);

    impl FrameSink for Counting {
        fn write_frame(&mut self, _frame: &FrameImage) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let count = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut sink = FanoutSink::new(vec![
            Box::new(Counting(count.clone())),
            Box::new(Counting(count.clone())),
        ]);
        let frame = FrameImage {
            index: 0,
            time: 0.0,
            width: 1,
            height: 1,
            row_order: RowOrder::TopDown,
            pixels: vec![0; 4],
        };
        sink.write_frame(&frame).unwrap();
        sink.finish().unwrap();
        assert_eq!(count.get(), 2);
        assert_eq!(sink.len(), 2);
    }
}
