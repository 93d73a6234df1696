//! Overlap merge of polled log snapshots into a bounded local buffer.
//!
//! The server only ever returns the last few lines of the worker log. Each
//! snapshot is aligned against the end of the local buffer: the largest `k`
//! for which the buffer's last `k` lines equal the snapshot's first `k`
//! lines is treated as already seen, and only `snapshot[k..]` is appended.
//! With no overlap the snapshot replaces the buffer. Lines produced between
//! two polls beyond the snapshot window are lost in that case.

/// Default number of lines kept locally.
pub const DEFAULT_MAX_LINES: usize = 2000;

/// What a merge did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The snapshot was entirely contained in the buffer.
    Unchanged,
    /// New lines were appended after an overlap of `overlap` lines.
    Appended { overlap: usize, added: usize },
    /// The buffer was replaced by the snapshot.
    Replaced,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Largest `k` such that `local[len - k..] == snapshot[..k]`.
pub fn find_overlap(local: &[String], snapshot: &[String]) -> usize {
    let max = local.len().min(snapshot.len());
    (1..=max)
        .rev()
        .find(|&k| local[local.len() - k..] == snapshot[..k])
        .unwrap_or(0)
}

/// Locally accumulated log lines, never longer than `max_lines`.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: Vec<String>,
    max_lines: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: Vec::new(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Fold a freshly polled snapshot into the buffer.
    pub fn merge(&mut self, snapshot: &[String]) -> MergeOutcome {
        if self.lines.is_empty() {
            if snapshot.is_empty() {
                return MergeOutcome::Unchanged;
            }
            self.adopt(snapshot);
            return MergeOutcome::Replaced;
        }

        let overlap = find_overlap(&self.lines, snapshot);
        if overlap == 0 {
            self.adopt(snapshot);
            return MergeOutcome::Replaced;
        }

        let fresh = &snapshot[overlap..];
        if fresh.is_empty() {
            return MergeOutcome::Unchanged;
        }
        self.lines.extend_from_slice(fresh);
        self.truncate_front();
        MergeOutcome::Appended {
            overlap,
            added: fresh.len(),
        }
    }

    fn adopt(&mut self, snapshot: &[String]) {
        self.lines = snapshot.to_vec();
        self.truncate_front();
    }

    fn truncate_front(&mut self) {
        if self.lines.len() > self.max_lines {
            let excess = self.lines.len() - self.max_lines;
            self.lines.drain(..excess);
        }
    }
}
