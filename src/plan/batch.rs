// src/plan/batch.rs

//! Grouping of elementary counting units into batches.
//!
//! The wrapped counting tool misreports its memory use when many small runs
//! happen back to back in one process. Folding a handful of units into one
//! process and merging them there hides the defect while keeping per-job peak
//! memory bounded. The group size is a policy value so it can be changed (or
//! set to 1) once the tool is fixed upstream.

use std::ops::RangeInclusive;

/// Units per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Minimum width of zero-padded batch labels.
pub const LABEL_WIDTH: usize = 3;

/// One batch: consecutive elementary units `first..=last`, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-padded index of the first unit (e.g. `"009"`).
    pub label: String,
    pub first: u64,
    pub last: u64,
}

impl Batch {
    pub fn units(&self) -> RangeInclusive<u64> {
        self.first..=self.last
    }

    pub fn unit_count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Batch size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    size: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl BatchPolicy {
    /// Returns `None` for a zero size.
    pub fn new(size: usize) -> Option<Self> {
        (size > 0).then_some(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Partition `1..=total` into consecutive batches of `size` units; the last
    /// batch holds the remainder. `total == 0` yields no batches.
    pub fn plan(&self, total: u64) -> Vec<Batch> {
        let size = self.size as u64;
        let mut batches = Vec::with_capacity(total.div_ceil(size) as usize);
        let width = label_width(total, size);
        let mut first = 1;

        while first <= total {
            let last = first.saturating_add(size - 1).min(total);
            batches.push(Batch {
                label: batch_label(first, width),
                first,
                last,
            });
            if last == u64::MAX {
                break;
            }
            first = last + 1;
        }

        batches
    }

    /// The full window of unit indices a batch starting at `first` covers.
    ///
    /// The window can run past the real unit count for the final batch; the
    /// executor guards every unit with a range check against the count.
    pub fn window(&self, first: u64) -> RangeInclusive<u64> {
        first..=first.saturating_add(self.size as u64 - 1)
    }
}

/// Label width for a plan over `total` units: wide enough for the start of
/// the final batch, never below [`LABEL_WIDTH`]. All labels of one plan share
/// it, so they sort like their starting units.
fn label_width(total: u64, size: u64) -> usize {
    let last_first = match total {
        0 => return LABEL_WIDTH,
        n => (n - 1) / size * size + 1,
    };
    last_first.to_string().len().max(LABEL_WIDTH)
}

/// Label for a batch starting at unit `first`, zero-padded to `width`.
pub fn batch_label(first: u64, width: usize) -> String {
    format!("{first:0width$}")
}

/// Parse the content of a batch descriptor file (the starting unit index).
pub fn parse_descriptor(text: &str) -> Option<u64> {
    text.trim().parse::<u64>().ok().filter(|&n| n > 0)
}
