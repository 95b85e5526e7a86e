use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Two-sided index of `(left, right) -> value` pairs.
///
/// Both directions live in one structure, so adding or removing a pair always
/// updates the forward and the reverse side together. Keys iterate in order,
/// which keeps subscriber lists stable.
#[derive(Debug, Clone)]
pub struct BiMap<L, R, V> {
    forward: BTreeMap<L, BTreeMap<R, V>>,
    reverse: BTreeMap<R, BTreeSet<L>>,
}

impl<L, R, V> Default for BiMap<L, R, V> {
    fn default() -> Self {
        Self {
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
        }
    }
}

impl<L, R, V> BiMap<L, R, V>
where
    L: Ord + Clone,
    R: Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value of a pair, returning the previous value
    pub fn add(
        &mut self,
        left: L,
        right: R,
        value: V,
    ) -> Option<V> {
        self.reverse.entry(right.clone()).or_default().insert(left.clone());
        self.forward.entry(left).or_default().insert(right, value)
    }

    pub fn get(
        &self,
        left: &L,
        right: &R,
    ) -> Option<&V> {
        self.forward.get(left).and_then(|rights| rights.get(right))
    }

    pub fn get_mut(
        &mut self,
        left: &L,
        right: &R,
    ) -> Option<&mut V> {
        self.forward.get_mut(left).and_then(|rights| rights.get_mut(right))
    }

    pub fn remove(
        &mut self,
        left: &L,
        right: &R,
    ) -> Option<V> {
        let rights = self.forward.get_mut(left)?;
        let value = rights.remove(right)?;
        if rights.is_empty() {
            self.forward.remove(left);
        }
        if let Some(lefts) = self.reverse.get_mut(right) {
            lefts.remove(left);
            if lefts.is_empty() {
                self.reverse.remove(right);
            }
        }
        Some(value)
    }

    /// Remove every pair of one left key
    pub fn remove_left(
        &mut self,
        left: &L,
    ) -> Vec<(R, V)> {
        let Some(rights) = self.forward.remove(left) else {
            return Vec::new();
        };
        for right in rights.keys() {
            if let Some(lefts) = self.reverse.get_mut(right) {
                lefts.remove(left);
                if lefts.is_empty() {
                    self.reverse.remove(right);
                }
            }
        }
        rights.into_iter().collect()
    }

    /// Remove every pair of one right key
    pub fn remove_right(
        &mut self,
        right: &R,
    ) -> Vec<(L, V)> {
        let Some(lefts) = self.reverse.remove(right) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(lefts.len());
        for left in lefts {
            if let Some(rights) = self.forward.get_mut(&left) {
                if let Some(value) = rights.remove(right) {
                    removed.push((left.clone(), value));
                }
                if rights.is_empty() {
                    self.forward.remove(&left);
                }
            }
        }
        removed
    }

    pub fn rights_of(
        &self,
        left: &L,
    ) -> Vec<R> {
        self.forward
            .get(left)
            .map(|rights| rights.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn lefts_of(
        &self,
        right: &R,
    ) -> Vec<L> {
        self.reverse
            .get(right)
            .map(|lefts| lefts.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_left(
        &self,
        left: &L,
    ) -> bool {
        self.forward.contains_key(left)
    }

    pub fn contains_right(
        &self,
        right: &R,
    ) -> bool {
        self.reverse.contains_key(right)
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.forward.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
