//! Measure sets and the powerset lattice they live in.

use std::{collections::BTreeSet, fmt, iter::FusedIterator};

use serde::{Deserialize, Serialize};

pub type MeasureId = u64;

/// Upper bound on distinct measures a [`PowerSet`] can enumerate (bitmask width).
pub const MAX_POWER_SET_MEASURES: usize = 63;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasureSet(BTreeSet<MeasureId>);

impl MeasureSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn single(measure: MeasureId) -> Self {
        Self(BTreeSet::from([measure]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn tier(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, measure: MeasureId) -> bool {
        self.0.contains(&measure)
    }

    pub fn iter(&self) -> impl Iterator<Item = MeasureId> + '_ {
        self.0.iter().copied()
    }

    pub fn is_subset_of(&self, other: &MeasureSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn is_superset_of(&self, other: &MeasureSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn is_proper_subset_of(&self, other: &MeasureSet) -> bool {
        self.len() < other.len() && self.is_subset_of(other)
    }

    pub fn is_proper_superset_of(&self, other: &MeasureSet) -> bool {
        other.is_proper_subset_of(self)
    }

    pub fn union(&self, other: &MeasureSet) -> MeasureSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &MeasureSet) -> MeasureSet {
        Self(self.0.difference(&other.0).copied().collect())
    }

    pub fn with(&self, measure: MeasureId) -> MeasureSet {
        let mut members = self.0.clone();
        members.insert(measure);
        Self(members)
    }

    pub fn without(&self, measure: MeasureId) -> MeasureSet {
        let mut members = self.0.clone();
        members.remove(&measure);
        Self(members)
    }

    /// Every subset of this set, including the empty set and the set itself.
    pub fn power_set(&self) -> PowerSet {
        PowerSet::from_members(self.0.iter().copied().collect())
    }
}

impl FromIterator<MeasureId> for MeasureSet {
    fn from_iter<T: IntoIterator<Item = MeasureId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[MeasureId; N]> for MeasureSet {
    fn from(members: [MeasureId; N]) -> Self {
        members.into_iter().collect()
    }
}

impl fmt::Display for MeasureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, measure) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{measure}")?;
        }
        write!(f, "}}")
    }
}

/// Lazily enumerates all `2^n` subsets of a measure list.
///
/// Duplicate input measures are collapsed first, so the sequence always has
/// exactly `2^distinct` members.
#[derive(Debug, Clone)]
pub struct PowerSet {
    members: Vec<MeasureId>,
    next_mask: u64,
    end_mask: u64,
}

impl PowerSet {
    pub fn try_new(measures: &[MeasureId]) -> Option<Self> {
        let members: Vec<MeasureId> = measures
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if members.len() > MAX_POWER_SET_MEASURES {
            return None;
        }
        Some(Self::from_members(members))
    }

    fn from_members(members: Vec<MeasureId>) -> Self {
        let width = members.len().min(MAX_POWER_SET_MEASURES);
        Self {
            members,
            next_mask: 0,
            end_mask: 1u64 << width,
        }
    }
}

impl Iterator for PowerSet {
    type Item = MeasureSet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_mask >= self.end_mask {
            return None;
        }
        let mask = self.next_mask;
        self.next_mask += 1;
        Some(
            self.members
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1u64 << bit) != 0)
                .map(|(_, measure)| *measure)
                .collect(),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end_mask - self.next_mask) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PowerSet {}

impl FusedIterator for PowerSet {}

/// Powerset of an arbitrary measure list. Inputs wider than
/// [`MAX_POWER_SET_MEASURES`] distinct measures are truncated to that width;
/// use [`PowerSet::try_new`] to detect that case.
pub fn power_set(measures: &[MeasureId]) -> PowerSet {
    let members: Vec<MeasureId> = measures
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_POWER_SET_MEASURES)
        .collect();
    PowerSet::from_members(members)
}
