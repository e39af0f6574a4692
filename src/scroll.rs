use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Scrollable surface the driver moves through.
pub trait Viewport {
    /// Full scrollable extent of the document.
    fn scroll_height(&self) -> f64;

    fn viewport_height(&self) -> f64;

    fn scroll_top(&self) -> f64;

    /// Smooth-scroll so that `top` is the first visible offset.
    fn scroll_to(&mut self, top: f64);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollTiming {
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub bottom_buffer_px: f64,
    pub bottom_settle_ms: u64,
    pub growth_threshold_px: f64,
    pub post_check_ms: u64,
    pub step_settle_ms: u64,
}

impl Default for ScrollTiming {
    fn default() -> Self {
        Self {
            jitter_min_ms: 300,
            jitter_max_ms: 1000,
            bottom_buffer_px: 200.0,
            bottom_settle_ms: 2000,
            growth_threshold_px: 100.0,
            post_check_ms: 500,
            step_settle_ms: 600,
        }
    }
}

impl ScrollTiming {
    /// Random pause before the next step, in `[jitter_min_ms, jitter_max_ms)`.
    pub fn next_delay(&self) -> Duration {
        if self.jitter_max_ms <= self.jitter_min_ms {
            return Duration::from_millis(self.jitter_min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.jitter_min_ms..self.jitter_max_ms);
        Duration::from_millis(ms)
    }
}

/// What a single scroll step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollStep {
    /// Moved down one viewport.
    Advanced { to: f64 },
    /// Hit the bottom and the feed grew; continuing from the old bottom.
    LoadedMore { from: f64, grew_by: f64 },
    /// Hit the bottom and nothing loaded; jumped back to the top.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ScrollDriver {
    cursor: f64,
    max_scroll_seen: f64,
    timing: ScrollTiming,
}

impl ScrollDriver {
    pub fn new(timing: ScrollTiming) -> Self {
        Self {
            cursor: 0.0,
            max_scroll_seen: 0.0,
            timing,
        }
    }

    pub fn reset(&mut self, cursor: f64) {
        self.cursor = cursor.max(0.0);
        self.max_scroll_seen = 0.0;
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn max_scroll_seen(&self) -> f64 {
        self.max_scroll_seen
    }

    pub fn timing(&self) -> &ScrollTiming {
        &self.timing
    }

    fn near_bottom(&self, extent: f64, viewport: f64) -> bool {
        self.cursor >= extent - viewport - self.timing.bottom_buffer_px
    }

    /// Moves the viewport once and waits for the page to settle.
    ///
    /// The caller extracts right after this returns.
    pub async fn step<V: Viewport + ?Sized>(&mut self, page: &mut V) -> ScrollStep {
        let extent = page.scroll_height();
        let viewport = page.viewport_height();
        self.max_scroll_seen = self.max_scroll_seen.max(extent);

        if !self.near_bottom(extent, viewport) {
            self.cursor += viewport;
            page.scroll_to(self.cursor);
            debug!(cursor = self.cursor, extent, "Scrolled one viewport");
            sleep_ms(self.timing.step_settle_ms).await;
            return ScrollStep::Advanced { to: self.cursor };
        }

        page.scroll_to(extent);
        sleep_ms(self.timing.bottom_settle_ms).await;

        let grown = page.scroll_height();
        self.max_scroll_seen = self.max_scroll_seen.max(grown);
        let outcome = if grown > extent + self.timing.growth_threshold_px {
            debug!(from = extent, to = grown, "New content loaded at bottom");
            self.cursor = extent;
            ScrollStep::LoadedMore {
                from: extent,
                grew_by: grown - extent,
            }
        } else {
            debug!(extent, "No new content, cycling back to top");
            self.cursor = 0.0;
            page.scroll_to(0.0);
            ScrollStep::Exhausted
        };

        sleep_ms(self.timing.post_check_ms).await;
        outcome
    }
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
