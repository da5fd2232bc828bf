//! Partitioning of an index range into per-unit chunks.
//!
//! A [`WorkDiv`] assigns unit `t` the contiguous range
//! `[t * elems, (t + 1) * elems)`, clipped to the length of the buffer.
//! Units whose first index lies past the end do nothing.

use std::ops::Range;

use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("[{threads} x {elems}]")]
pub struct WorkDiv {
    /// Number of parallel execution units.
    pub threads: usize,
    /// Number of elements each unit processes.
    pub elems: usize,
}

impl WorkDiv {
    #[inline]
    pub const fn new(threads: usize, elems: usize) -> Self {
        Self { threads, elems }
    }

    /// The smallest division with `elems` elements per unit that covers `len`.
    pub fn covering(len: usize, elems: usize) -> Result<Self, DispatchError> {
        let div = Self::new(0, elems);
        if elems == 0 {
            return Err(DispatchError::WorkDiv {
                div,
                len,
                reason: "zero elements per unit",
            });
        }
        Ok(Self::new(len.div_ceil(elems), elems))
    }

    /// Checks that every index in `[0, len)` is assigned to exactly one unit.
    pub fn check(&self, len: usize) -> Result<(), DispatchError> {
        let err = |reason| DispatchError::WorkDiv {
            div: *self,
            len,
            reason,
        };
        if self.elems == 0 {
            return Err(err("zero elements per unit"));
        }
        match self.threads.checked_mul(self.elems) {
            Some(extent) if extent >= len => Ok(()),
            Some(_) => Err(err("units do not cover the range")),
            None => Err(err("extent overflows")),
        }
    }

    /// The sub-range unit `thread` is responsible for, or `None` if it has nothing to do.
    #[inline]
    pub fn range(&self, thread: usize, len: usize) -> Option<Range<usize>> {
        let first = thread.checked_mul(self.elems)?;
        if thread >= self.threads || first >= len {
            return None;
        }
        let last = first.saturating_add(self.elems).min(len);
        Some(first..last)
    }
}

/// Decides how a device partitions work it is not given an explicit division for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorkDivPolicy {
    /// Preferred number of elements per unit.
    pub elems: usize,
    /// Upper bound of units. The per-unit extent grows to stay under it.
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_threads: Option<usize>,
}

impl WorkDivPolicy {
    #[inline]
    pub const fn new(elems: usize) -> Self {
        Self {
            elems,
            max_threads: None,
        }
    }

    #[inline]
    pub const fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = Some(max_threads);
        self
    }

    pub fn for_len(&self, len: usize) -> Result<WorkDiv, DispatchError> {
        let elems = match self.max_threads {
            Some(0) => {
                return Err(DispatchError::WorkDiv {
                    div: WorkDiv::new(0, self.elems),
                    len,
                    reason: "zero units allowed",
                });
            }
            Some(max) => self.elems.max(len.div_ceil(max)),
            None => self.elems,
        };
        WorkDiv::covering(len, elems)
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkDiv, WorkDivPolicy};

    fn coverage(div: WorkDiv, len: usize) -> Vec<usize> {
        let mut hits = vec![0; len];
        for thread in 0..div.threads {
            if let Some(range) = div.range(thread, len) {
                assert!(range.end <= len, "unit {thread} overruns {len}");
                range.for_each(|i| hits[i] += 1);
            }
        }
        hits
    }

    #[test]
    fn test_uneven_partition() {
        let div = WorkDiv::covering(10, 3).unwrap();
        assert_eq!(div, WorkDiv::new(4, 3));
        assert_eq!(div.range(3, 10), Some(9..10));
        assert_eq!(div.range(4, 10), None);
        assert!(coverage(div, 10).into_iter().all(|x| x == 1));
    }

    #[test]
    fn test_idle_units() {
        // more units than needed: the tail does nothing
        let div = WorkDiv::new(8, 4);
        div.check(5).unwrap();
        assert_eq!(div.range(1, 5), Some(4..5));
        assert_eq!(div.range(2, 5), None);
        assert!(coverage(div, 5).into_iter().all(|x| x == 1));
    }

    #[test]
    fn test_random_partition() {
        for _ in 0..200 {
            let len = fastrand::usize(0..1000);
            let elems = fastrand::usize(1..64);
            let extra = fastrand::usize(0..4);
            let div = WorkDiv::covering(len, elems).unwrap();
            let div = WorkDiv::new(div.threads + extra, elems);
            div.check(len).unwrap();
            assert!(coverage(div, len).into_iter().all(|x| x == 1));
        }
    }

    #[test]
    fn test_malformed() {
        assert!(WorkDiv::covering(4, 0).is_err());
        assert!(WorkDiv::new(2, 0).check(0).is_err());
        assert!(WorkDiv::new(2, 2).check(5).is_err());
        assert!(WorkDiv::new(usize::MAX, 2).check(5).is_err());
        WorkDiv::new(0, 1).check(0).unwrap();
    }

    #[test]
    fn test_policy() {
        let policy = WorkDivPolicy::new(4);
        assert_eq!(policy.for_len(10).unwrap(), WorkDiv::new(3, 4));
        assert_eq!(policy.for_len(0).unwrap(), WorkDiv::new(0, 4));

        let policy = WorkDivPolicy::new(1).max_threads(4);
        assert_eq!(policy.for_len(10).unwrap(), WorkDiv::new(4, 3));
        assert_eq!(policy.for_len(3).unwrap(), WorkDiv::new(3, 1));

        assert!(WorkDivPolicy::new(1).max_threads(0).for_len(3).is_err());
        assert!(WorkDivPolicy::new(0).for_len(3).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_policy_serde() -> Result<(), Box<dyn std::error::Error>> {
        let policy: WorkDivPolicy = serde_json::from_str(r#"{ "elems": 16 }"#)?;
        assert_eq!(policy, WorkDivPolicy::new(16));

        let text = serde_json::to_string(&policy.max_threads(8))?;
        let back: WorkDivPolicy = serde_json::from_str(&text)?;
        assert_eq!(back.max_threads, Some(8));
        Ok(())
    }
}
