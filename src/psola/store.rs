use super::Epoch;

// -------------------------------------------------------------------------------------------------

/// Number of epochs the store retains. At the lowest trackable pitch this covers several
/// seconds of input, far more than the synthesis latency ever looks back.
const STORE_CAPACITY: usize = 256;

// -------------------------------------------------------------------------------------------------

/// Fixed capacity ring of detected epochs, ordered by stream position.
///
/// Appending is O(1) and overwrites the oldest entry when full. Lookups rely on the
/// detector appending epochs with strictly increasing positions, which allows a binary
/// search over the logical ring order.
#[derive(Debug, Clone)]
pub struct EpochStore {
    epochs: Vec<Epoch>,
    head: usize,
    len: usize,
}

impl EpochStore {
    pub fn new() -> Self {
        Self {
            epochs: vec![
                Epoch {
                    position: 0,
                    period: 0.0,
                    confidence: 0.0,
                };
                STORE_CAPACITY
            ],
            head: 0,
            len: 0,
        }
    }

    /// Number of retained epochs.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The most recently appended epoch.
    #[inline]
    pub fn latest(&self) -> Option<&Epoch> {
        if self.len == 0 {
            None
        } else {
            Some(self.get(self.len - 1))
        }
    }

    /// Append a new epoch, overwriting the oldest entry when the store is full.
    ///
    /// Positions must be strictly increasing. Out of order appends are dropped to keep
    /// lookups well defined.
    pub fn append(&mut self, epoch: Epoch) {
        if let Some(latest) = self.latest() {
            if epoch.position <= latest.position {
                debug_assert!(false, "non-monotonic epoch append");
                return;
            }
        }
        let index = (self.head + self.len) % STORE_CAPACITY;
        self.epochs[index] = epoch;
        if self.len < STORE_CAPACITY {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % STORE_CAPACITY;
        }
    }

    /// Find the epoch closest to the given stream position, if any.
    pub fn nearest(&self, position: u64) -> Option<&Epoch> {
        if self.len == 0 {
            return None;
        }
        // binary search for the first epoch at or after the position
        let mut low = 0;
        let mut high = self.len;
        while low < high {
            let mid = (low + high) / 2;
            if self.get(mid).position < position {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low == 0 {
            return Some(self.get(0));
        }
        if low == self.len {
            return Some(self.get(self.len - 1));
        }
        let before = self.get(low - 1);
        let after = self.get(low);
        if position - before.position <= after.position - position {
            Some(before)
        } else {
            Some(after)
        }
    }

    /// Drop all retained epochs.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    #[inline]
    fn get(&self, logical_index: usize) -> &Epoch {
        debug_assert!(logical_index < self.len);
        &self.epochs[(self.head + logical_index) % STORE_CAPACITY]
    }
}

impl Default for EpochStore {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(position: u64) -> Epoch {
        Epoch {
            position,
            period: 100.0,
            confidence: 1.0,
        }
    }

    #[test]
    fn append_and_nearest() {
        let mut store = EpochStore::new();
        assert!(store.nearest(100).is_none());

        for position in [100, 200, 300, 400] {
            store.append(epoch(position));
        }
        assert_eq!(store.len(), 4);
        assert_eq!(store.latest().unwrap().position, 400);

        assert_eq!(store.nearest(0).unwrap().position, 100);
        assert_eq!(store.nearest(100).unwrap().position, 100);
        assert_eq!(store.nearest(149).unwrap().position, 100);
        // exact midpoint resolves to the earlier epoch
        assert_eq!(store.nearest(150).unwrap().position, 100);
        assert_eq!(store.nearest(151).unwrap().position, 200);
        assert_eq!(store.nearest(1000).unwrap().position, 400);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut store = EpochStore::new();
        for i in 0..STORE_CAPACITY as u64 + 10 {
            store.append(epoch(i * 100));
        }
        assert_eq!(store.len(), STORE_CAPACITY);
        // the oldest 10 epochs are gone
        assert_eq!(store.nearest(0).unwrap().position, 1000);
        assert_eq!(
            store.latest().unwrap().position,
            (STORE_CAPACITY as u64 + 9) * 100
        );
    }

    #[test]
    fn rejects_non_monotonic_appends() {
        let mut store = EpochStore::new();
        store.append(epoch(100));
        // would panic in debug builds, so only check this in release builds
        if !cfg!(debug_assertions) {
            store.append(epoch(50));
            assert_eq!(store.len(), 1);
        }
    }

    #[test]
    fn clear_empties_store() {
        let mut store = EpochStore::new();
        store.append(epoch(100));
        store.clear();
        assert!(store.is_empty());
        assert!(store.nearest(100).is_none());
        // appends restart from scratch after a clear
        store.append(epoch(50));
        assert_eq!(store.nearest(0).unwrap().position, 50);
    }
}
