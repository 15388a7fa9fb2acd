//! Adaptive frame-rate policy and frame-time accounting.

use std::collections::VecDeque;
use std::time::Duration;

use super::ServerConfig;

/// Frames per second shaved off the maximum for each client beyond the first.
const FPS_STEP_PER_CLIENT: u32 = 30;

/// Frame times kept for the rolling average.
pub const FRAME_TIME_WINDOW: usize = 300;

/// Target frame rate as a function of connected clients.
///
/// One client gets `max_fps`; each extra client costs 30 FPS down to the
/// `base_fps` floor. With no clients the loop idles at `idle_fps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRatePolicy {
    base_fps: u32,
    max_fps: u32,
    idle_fps: u32,
    adaptive: bool,
}

impl FrameRatePolicy {
    /// Build the policy from a server configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            base_fps: config.base_fps,
            max_fps: config.max_fps,
            idle_fps: config.idle_fps,
            adaptive: config.adaptive_frame_rate,
        }
    }

    /// Target FPS for `clients` connected peers.
    #[must_use]
    pub fn target_fps(&self, clients: usize) -> u32 {
        match clients {
            0 => self.idle_fps,
            _ if !self.adaptive => self.base_fps,
            1 => self.max_fps,
            n => {
                let extra = u32::try_from(n - 1).unwrap_or(u32::MAX);
                self.max_fps
                    .saturating_sub(extra.saturating_mul(FPS_STEP_PER_CLIENT))
                    .max(self.base_fps)
            }
        }
    }

    /// Whether `fps` for `clients` peers counts as high-performance mode.
    #[must_use]
    pub fn is_high_performance(&self, clients: usize, fps: u32) -> bool {
        clients > 0 && fps > self.base_fps
    }

    /// Wall time one frame may take at `fps`.
    #[must_use]
    pub fn frame_duration(fps: u32) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(fps.max(1)))
    }
}

/// Rolling window of recent frame processing times.
#[derive(Debug)]
pub struct FrameTimeWindow {
    samples: VecDeque<Duration>,
    total: Duration,
    capacity: usize,
}

impl FrameTimeWindow {
    /// Window holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            total: Duration::ZERO,
            capacity: capacity.max(1),
        }
    }

    /// Add one sample, evicting the oldest when full.
    pub fn record(&mut self, frame_time: Duration) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.total -= oldest;
            }
        }
        self.samples.push_back(frame_time);
        self.total += frame_time;
    }

    /// Mean of the samples in the window, zero when empty.
    #[must_use]
    pub fn average(&self) -> Duration {
        match u32::try_from(self.samples.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total / n,
        }
    }

    /// Samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for FrameTimeWindow {
    fn default() -> Self {
        Self::new(FRAME_TIME_WINDOW)
    }
}
