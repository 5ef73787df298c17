//! Anomaly bookkeeping
//!
//! Infractions record protocol deviations, events record conditions that
//! may be raised as alerts. Both are accumulated per direction while a
//! message is parsed and cleared at message boundaries. What each bit
//! means belongs to the parser; this module only stores them.

/// Fixed-width bit set of anomaly codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnomalySet {
    bits: u128,
}

impl AnomalySet {
    /// Highest code that can be stored plus one
    pub const CAPACITY: u32 = 128;

    pub fn new() -> Self {
        Self { bits: 0 }
    }

    /// Record a code. Codes outside the set's range are ignored.
    pub fn insert(&mut self, code: u32) {
        if code < Self::CAPACITY {
            self.bits |= 1u128 << code;
        }
    }

    pub fn contains(&self, code: u32) -> bool {
        code < Self::CAPACITY && self.bits & (1u128 << code) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn reset(&mut self) {
        self.bits = 0;
    }
}

/// Protocol deviations seen in the current message
pub type Infractions = AnomalySet;

/// Alertable conditions seen in the current message
pub type Events = AnomalySet;

/// Codes raised by flow state management itself
pub mod codes {
    /// Too many requests were pipelined ahead of their responses
    pub const INF_PIPELINE_OVERFLOW: u32 = 0;
    /// A response arrived with no request to pair it with
    pub const INF_RESPONSE_WO_REQUEST: u32 = 1;

    pub const EVENT_PIPELINE_MAX: u32 = 0;
    pub const EVENT_RESPONSE_WO_REQUEST: u32 = 1;
}
