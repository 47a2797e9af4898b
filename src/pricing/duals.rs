use std::borrow::Cow;

use crate::misc::FullHashMap;
use crate::pricing::job::BlockId;
use crate::INT_FEAS_TOL;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Row of the master problem a dual value belongs to
pub enum DualKey {
    MasterConstraint(u32),
    LinkingVariable(u32),
    Convexity(BlockId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Sign restriction of a dual value, given by the sense of its row
pub enum DualSign {
    Free,
    NonNegative,
    NonPositive,
}

impl DualSign {
    pub fn project(&self, value: f64) -> f64 {
        match self {
            DualSign::Free => value,
            DualSign::NonNegative => value.max(0.0),
            DualSign::NonPositive => value.min(0.0),
        }
    }

    pub fn admits(&self, value: f64) -> bool {
        match self {
            DualSign::Free => true,
            DualSign::NonNegative => value >= -INT_FEAS_TOL,
            DualSign::NonPositive => value <= INT_FEAS_TOL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct DualEntry {
    value: f64,
    sign: DualSign,
}

/// Snapshot of dual values (or Farkas multipliers) of the master problem
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DualPrices {
    entries: FullHashMap<DualKey, DualEntry>,
}

impl DualPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: DualKey, value: f64, sign: DualSign) {
        self.entries.insert(key, DualEntry { value, sign });
    }

    pub fn with(mut self, key: DualKey, value: f64, sign: DualSign) -> Self {
        self.insert(key, value, sign);
        self
    }

    /// Dual value of a row, zero for rows not present
    pub fn get(&self, key: &DualKey) -> f64 {
        self.entries.get(key).map_or(0.0, |e| e.value)
    }

    pub fn sign(&self, key: &DualKey) -> Option<DualSign> {
        self.entries.get(key).map(|e| e.sign)
    }

    pub fn convexity(&self, block: BlockId) -> f64 {
        self.get(&DualKey::Convexity(block))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DualKey, f64)> {
        self.entries.iter().map(|(k, e)| (k, e.value))
    }

    /// Every value respects the sign restriction of its row
    pub fn is_sign_feasible(&self) -> bool {
        self.entries.values().all(|e| e.sign.admits(e.value))
    }

    /// Euclidean distance over the union of both key sets
    pub fn distance(&self, other: &DualPrices) -> f64 {
        let mut sum = 0.0;
        for (key, e) in &self.entries {
            let d = e.value - other.get(key);
            sum += d * d;
        }
        for (key, e) in &other.entries {
            if !self.entries.contains_key(key) {
                sum += e.value * e.value;
            }
        }
        sum.sqrt()
    }

    /// Wentges rule: `self * alpha + out_duals * (1 - alpha)` where `self` is the
    /// stability center. Rows added since the center was taken count as zero in
    /// the center. The sign restriction of `out_duals` is enforced on the result.
    /// If alpha <= 0, return borrowed cow
    pub fn linear_combination<'a>(&self, alpha: f64, out_duals: &'a DualPrices) -> Cow<'a, DualPrices> {
        if alpha < INT_FEAS_TOL {
            return Cow::Borrowed(out_duals);
        }

        let mut out = FullHashMap::default();
        for (key, entry) in &out_duals.entries {
            let center = self.get(key);
            let value = entry.sign.project(center * alpha + entry.value * (1.0 - alpha));
            out.insert(*key, DualEntry { value, sign: entry.sign });
        }

        Cow::Owned(DualPrices { entries: out })
    }
}
