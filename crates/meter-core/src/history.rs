use crate::error::ConfigError;
use crate::sample::Sample;
use std::collections::VecDeque;

// Larger capacities grow on demand instead of reserving up front.
const PREALLOC_LIMIT: usize = 65_536;

/// Fixed-capacity sliding window of acquired samples, oldest first.
///
/// Appending to a full buffer evicts the oldest sample, so `len() <= capacity()`
/// always holds and the newest `capacity()` samples are kept in acquisition order.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    evicted: u64,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            samples: VecDeque::with_capacity(capacity.min(PREALLOC_LIMIT)),
            capacity,
            evicted: 0,
        })
    }

    /// Push a sample, returning the evicted one when the window was full.
    pub fn append(&mut self, sample: Sample) -> Option<Sample> {
        let evicted = if self.samples.len() == self.capacity {
            self.evicted += 1;
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Owned copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// Replace `out` with the current contents, reusing its allocation.
    pub fn copy_into(&self, out: &mut Vec<Sample>) {
        out.clear();
        out.extend(self.samples.iter().copied());
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> + ExactSizeIterator + '_ {
        self.samples.iter()
    }

    /// Measurement values only, oldest first (what a strip chart plots).
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples dropped off the front since construction.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
