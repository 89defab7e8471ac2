//! Simulation-thread loop: evaluate the scene at the clock's time, fill a
//! pooled draw list, submit it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::draw_list::DrawList;
use crate::frame_queue::FrameProducer;

/// Anything that can describe the scene at a point in time.
pub trait SceneSource {
    /// Fill `list` for scene time `time` (seconds). Returning false skips the
    /// frame and the list goes back to the pool unsubmitted.
    fn populate(&mut self, time: f64, list: &mut DrawList) -> bool;
}

/// Source of scene times. `None` ends the simulation.
pub trait MediaClock: Send {
    fn next_time(&mut self) -> Option<f64>;
}

/// Real-time clock paced to `fps`, optionally bounded by `duration`.
pub struct WallClock {
    start: Option<Instant>,
    frame_interval: Duration,
    next_deadline: Option<Instant>,
    duration: Option<f64>,
}

impl WallClock {
    pub fn new(fps: f32, duration: Option<f64>) -> Self {
        Self {
            start: None,
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1.0) as f64),
            next_deadline: None,
            duration,
        }
    }
}

impl MediaClock for WallClock {
    fn next_time(&mut self) -> Option<f64> {
        if let Some(deadline) = self.next_deadline {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        let now = Instant::now();
        let start = *self.start.get_or_insert(now);
        self.next_deadline = Some(now + self.frame_interval);

        let time = now.duration_since(start).as_secs_f64();
        match self.duration {
            Some(limit) if time > limit => None,
            _ => Some(time),
        }
    }
}

/// Deterministic clock for export: `total` frames at exactly `i / fps`.
#[derive(Clone, Debug)]
pub struct FixedStepClock {
    pub fps: f64,
    pub frame: u64,
    pub total: u64,
}

impl FixedStepClock {
    pub fn new(fps: f64, total: u64) -> Self {
        Self { fps, frame: 0, total }
    }
}

impl MediaClock for FixedStepClock {
    fn next_time(&mut self) -> Option<f64> {
        if self.frame >= self.total {
            return None;
        }
        let time = self.frame as f64 / self.fps;
        self.frame += 1;
        Some(time)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub submitted: u64,
    pub skipped: u64,
    /// True when the loop ended because the render side went away.
    pub consumer_gone: bool,
}

/// Run until the clock ends, `stop` is raised, or the consumer is dropped.
///
/// Blocking or eviction on a full queue follows the producer's overflow policy.
pub fn run_simulation<S, C>(scene: &mut S, producer: &FrameProducer, clock: &mut C, stop: &AtomicBool) -> SimulationStats
where
    S: SceneSource + ?Sized,
    C: MediaClock + ?Sized,
{
    let mut stats = SimulationStats::default();
    while !stop.load(Ordering::Acquire) {
        let Some(time) = clock.next_time() else {
            break;
        };

        let mut list = producer.acquire_draw_list();
        list.time = time;
        list.post_processing.time = time as f32;
        if !scene.populate(time, &mut list) {
            stats.skipped += 1;
            producer.recycle(list);
            continue;
        }

        if producer.submit(list).is_err() {
            log::info!("Render side closed, stopping simulation at t={:.3}s", time);
            stats.consumer_gone = true;
            break;
        }
        stats.submitted += 1;
    }
    log::debug!(
        "Simulation finished: {} submitted, {} skipped, {} dropped",
        stats.submitted,
        stats.skipped,
        producer.dropped_frames()
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_queue::{frame_queue, OverflowPolicy};
    use approx::assert_relative_eq;

    struct ClearColorScene;

    impl SceneSource for ClearColorScene {
        fn populate(&mut self, time: f64, list: &mut DrawList) -> bool {
            list.clear_color = [time as f32, 0.0, 0.0, 1.0];
            true
        }
    }

    struct EveryOtherFrame(u32);

    impl SceneSource for EveryOtherFrame {
        fn populate(&mut self, _time: f64, _list: &mut DrawList) -> bool {
            self.0 += 1;
            self.0 % 2 == 0
        }
    }

    #[test]
    fn test_fixed_step_clock() {
        let mut clock = FixedStepClock::new(4.0, 3);
        assert_eq!(clock.next_time(), Some(0.0));
        assert_eq!(clock.next_time(), Some(0.25));
        assert_eq!(clock.next_time(), Some(0.5));
        assert_eq!(clock.next_time(), None);
    }

    #[test]
    fn test_simulation_submits_every_step_in_order() {
        let (producer, mut consumer) = frame_queue(8, OverflowPolicy::Block);
        let stop = AtomicBool::new(false);
        let stats = run_simulation(&mut ClearColorScene, &producer, &mut FixedStepClock::new(10.0, 5), &stop);
        assert_eq!(stats.submitted, 5);
        assert!(!stats.consumer_gone);

        for i in 0..5 {
            let list = consumer.try_dequeue().unwrap();
            assert_relative_eq!(list.time, i as f64 / 10.0);
            assert_relative_eq!(list.post_processing.time, i as f32 / 10.0);
            assert_relative_eq!(list.clear_color[0], i as f32 / 10.0);
            consumer.release(list);
        }
    }

    #[test]
    fn test_skipped_frames_are_recycled() {
        let (producer, mut consumer) = frame_queue(8, OverflowPolicy::Block);
        let stop = AtomicBool::new(false);
        let stats = run_simulation(&mut EveryOtherFrame(0), &producer, &mut FixedStepClock::new(10.0, 6), &stop);
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.skipped, 3);
        assert_eq!(consumer.queued(), 3);
        // Skipped lists were reused rather than left allocated.
        assert!(consumer.allocated() <= 4);
        while let Some(list) = consumer.try_dequeue() {
            consumer.release(list);
        }
    }

    #[test]
    fn test_stops_when_consumer_dropped() {
        let (producer, consumer) = frame_queue(2, OverflowPolicy::Block);
        drop(consumer);
        let stop = AtomicBool::new(false);
        let stats = run_simulation(&mut ClearColorScene, &producer, &mut FixedStepClock::new(10.0, 100), &stop);
        assert!(stats.consumer_gone);
        assert_eq!(stats.submitted, 0);
    }

    #[test]
    fn test_stop_flag() {
        let (producer, _consumer) = frame_queue(2, OverflowPolicy::DropOldest);
        let stop = AtomicBool::new(true);
        let stats = run_simulation(&mut ClearColorScene, &producer, &mut FixedStepClock::new(10.0, 100), &stop);
        assert_eq!(stats, SimulationStats::default());
    }

    #[test]
    fn test_wall_clock_respects_duration() {
        let mut clock = WallClock::new(1000.0, Some(0.0));
        // First tick is at t=0; the limit is exclusive of anything later.
        assert_eq!(clock.next_time(), Some(0.0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.next_time(), None);
    }
}
