use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Half-open index interval of the lag-time axis used for fitting
///
/// `end: None` means "through the end of the data" and is resolved against the current data
/// length every time the interval is used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct FitInterval {
    pub start: usize,
    pub end: Option<usize>,
}

impl FitInterval {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    pub fn full() -> Self {
        Self::default()
    }

    /// Interval from its persisted form, a non-positive `end` is the "through the end" sentinel
    pub fn from_raw(start: i64, end: i64) -> Self {
        Self {
            start: start.max(0) as usize,
            end: (end > 0).then_some(end as usize),
        }
    }

    pub fn to_raw(&self) -> (i64, i64) {
        (self.start as i64, self.end.map_or(0, |end| end as i64))
    }

    /// Index range into data of length `len`, always within `0..len`
    pub fn resolve(&self, len: usize) -> Range<usize> {
        let end = self.end.map_or(len, |end| end.min(len));
        let start = self.start.min(end);
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_end() {
        let ival = FitInterval::from_raw(3, 0);
        assert_eq!(ival, FitInterval::new(3, None));
        assert_eq!(ival.resolve(10), 3..10);
        assert_eq!(ival.to_raw(), (3, 0));
        assert_eq!(FitInterval::from_raw(0, -1).resolve(5), 0..5);
    }

    #[test]
    fn clamped_to_data() {
        assert_eq!(FitInterval::new(2, Some(50)).resolve(10), 2..10);
        assert_eq!(FitInterval::new(20, None).resolve(10), 10..10);
        assert_eq!(FitInterval::new(4, Some(2)).resolve(10), 2..2);
    }
}
