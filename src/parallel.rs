//! Data-parallel execution units.
//!
//! Every value that lives on the execution units is tagged with how it is
//! laid out: [`Replicated`] values hold one identical copy per unit, while
//! [`Sharded`] values hold one disjoint piece of a logical batch per unit.
//! Cross-unit agreement is only ever established through [`all_reduce`].

use rayon::prelude::*;

use crate::error::{Error, Result};

/// A fixed set of execution units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Devices {
    count: usize,
    parallel: bool,
}

impl Devices {
    /// `count` units running on the rayon pool.
    pub fn new(count: usize) -> Self {
        Self {
            count: count.max(1),
            parallel: true,
        }
    }

    /// A single unit on the calling thread, for diagnostic runs.
    pub fn sequential() -> Self {
        Self {
            count: 1,
            parallel: false,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Run `f(unit, item)` once per unit, returning results in unit order.
    pub fn pmap<T, U, F>(&self, items: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(usize, T) -> U + Sync + Send,
    {
        debug_assert_eq!(items.len(), self.count);
        if self.parallel && items.len() > 1 {
            items
                .into_par_iter()
                .enumerate()
                .map(|(unit, item)| f(unit, item))
                .collect()
        } else {
            items
                .into_iter()
                .enumerate()
                .map(|(unit, item)| f(unit, item))
                .collect()
        }
    }
}

/// One identical copy of a value per execution unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Replicated<T> {
    copies: Vec<T>,
}

impl<T: Clone> Replicated<T> {
    /// Copy `value` onto `units` execution units.
    pub fn broadcast(value: T, units: usize) -> Self {
        Self {
            copies: vec![value; units.max(1)],
        }
    }
}

impl<T> Replicated<T> {
    /// Wrap per-unit copies that were computed identically on each unit.
    pub fn from_copies(copies: Vec<T>) -> Self {
        assert!(!copies.is_empty(), "replicated value needs at least one unit");
        Self { copies }
    }

    pub fn units(&self) -> usize {
        self.copies.len()
    }

    /// The copy held by unit 0, used for display and persistence.
    pub fn first(&self) -> &T {
        &self.copies[0]
    }

    pub fn get(&self, unit: usize) -> &T {
        &self.copies[unit]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.copies.iter()
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Replicated<U> {
        Replicated {
            copies: self.copies.iter().map(f).collect(),
        }
    }
}

impl<T: PartialEq> Replicated<T> {
    /// Whether every unit holds an equal copy.
    pub fn is_synced(&self) -> bool {
        self.copies.windows(2).all(|w| w[0] == w[1])
    }
}

/// One disjoint shard per execution unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Sharded<T> {
    shards: Vec<T>,
}

impl<T> Sharded<T> {
    pub fn from_shards(shards: Vec<T>) -> Self {
        assert!(!shards.is_empty(), "sharded value needs at least one unit");
        Self { shards }
    }

    pub fn units(&self) -> usize {
        self.shards.len()
    }

    pub fn get(&self, unit: usize) -> &T {
        &self.shards[unit]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.shards.iter()
    }

    pub fn into_shards(self) -> Vec<T> {
        self.shards
    }
}

impl<W: Clone> Sharded<Vec<W>> {
    /// Partition a logical batch into `units` equal contiguous shards.
    pub fn from_batch(batch: Vec<W>, units: usize) -> Result<Self> {
        if units == 0 || batch.is_empty() || batch.len() % units != 0 {
            return Err(Error::ShapeMismatch(format!(
                "batch of {} cannot be split across {} units",
                batch.len(),
                units
            )));
        }
        let per_unit = batch.len() / units;
        let shards = batch.chunks(per_unit).map(|c| c.to_vec()).collect();
        Ok(Self { shards })
    }

    /// Concatenate the shards back into the logical batch.
    pub fn to_batch(&self) -> Vec<W> {
        self.shards.iter().flatten().cloned().collect()
    }

    /// Total number of elements across all shards.
    pub fn batch_len(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }

    /// Redistribute the same logical batch over a different unit count.
    pub fn reshard(&self, units: usize) -> Result<Self> {
        Self::from_batch(self.to_batch(), units)
    }
}

/// Combine per-unit partial values in unit order and hand every unit the
/// same result.
pub fn all_reduce<T, F>(parts: Vec<T>, combine: F) -> Replicated<T>
where
    T: Clone,
    F: FnMut(T, T) -> T,
{
    let units = parts.len();
    let total = parts
        .into_iter()
        .reduce(combine)
        .expect("all_reduce needs at least one unit");
    Replicated::broadcast(total, units)
}
