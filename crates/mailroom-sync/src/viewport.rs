//! Autoscroll policy for the log pane.
//!
//! A viewer that is within `threshold` lines of the bottom before an update
//! stays pinned to the bottom after it. A viewer reading older output keeps
//! its top offset, clamped to the new content.

/// Default distance from the bottom that still counts as "at the bottom".
pub const DEFAULT_PIN_THRESHOLD: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogViewport {
    /// Index of the first visible line.
    offset: usize,
    /// Number of visible lines.
    height: usize,
    threshold: usize,
}

impl Default for LogViewport {
    fn default() -> Self {
        Self::new(DEFAULT_PIN_THRESHOLD)
    }
}

impl LogViewport {
    pub fn new(threshold: usize) -> Self {
        Self {
            offset: 0,
            height: 1,
            threshold,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Resize the visible window, keeping a pinned viewer pinned.
    pub fn set_height(&mut self, height: usize, total: usize) {
        let pinned = self.is_near_bottom(total);
        self.height = height.max(1);
        self.settle(pinned, total);
    }

    pub fn max_offset(&self, total: usize) -> usize {
        total.saturating_sub(self.height)
    }

    pub fn is_near_bottom(&self, total: usize) -> bool {
        self.max_offset(total).saturating_sub(self.offset) <= self.threshold
    }

    /// Apply the policy after the content changed from `before` to `after`
    /// lines.
    pub fn follow(&mut self, before: usize, after: usize) {
        let pinned = self.is_near_bottom(before);
        self.settle(pinned, after);
    }

    /// Re-pin if `pinned`, otherwise clamp the current offset to `total`.
    pub fn settle(&mut self, pinned: bool, total: usize) {
        let max = self.max_offset(total);
        self.offset = if pinned { max } else { self.offset.min(max) };
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.offset = self.offset.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: usize, total: usize) {
        self.offset = (self.offset + lines).min(self.max_offset(total));
    }

    pub fn scroll_to_bottom(&mut self, total: usize) {
        self.offset = self.max_offset(total);
    }

    /// Range of line indices currently visible.
    pub fn visible(&self, total: usize) -> std::ops::Range<usize> {
        let start = self.offset.min(total);
        start..(start + self.height).min(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(height: usize, total: usize) -> LogViewport {
        let mut vp = LogViewport::new(2);
        vp.set_height(height, total);
        vp
    }

    #[test]
    fn pinned_viewer_follows_new_lines() {
        let mut vp = viewport(10, 30);
        vp.scroll_to_bottom(30);
        assert_eq!(vp.offset(), 20);

        vp.follow(30, 35);
        assert_eq!(vp.offset(), 25);
        assert_eq!(vp.visible(35), 25..35);
    }

    #[test]
    fn near_bottom_counts_as_pinned() {
        let mut vp = viewport(10, 30);
        vp.scroll_to_bottom(30);
        vp.scroll_up(2);
        vp.follow(30, 40);
        assert_eq!(vp.offset(), 30);
    }

    #[test]
    fn reader_keeps_position() {
        let mut vp = viewport(10, 100);
        vp.scroll_to_bottom(100);
        vp.scroll_up(50);
        assert_eq!(vp.offset(), 40);

        vp.follow(100, 120);
        assert_eq!(vp.offset(), 40);
    }

    #[test]
    fn shrinking_content_clamps_offset() {
        let mut vp = viewport(10, 100);
        vp.scroll_to_bottom(100);
        vp.scroll_up(50);
        vp.follow(100, 5);
        assert_eq!(vp.offset(), 0);
        assert_eq!(vp.visible(5), 0..5);
    }

    #[test]
    fn scroll_down_stops_at_bottom() {
        let mut vp = viewport(10, 15);
        vp.scroll_down(100, 15);
        assert_eq!(vp.offset(), 5);
    }
}
