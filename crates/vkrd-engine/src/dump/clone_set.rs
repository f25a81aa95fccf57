use ash::vk;

/// Number of command-buffer clones a recording needs: one per distinct
/// guarded command (its own plus those of every secondary it executes) plus
/// one trailing pass-through clone.
pub fn required_clone_count(guarded: usize, secondary_guarded: usize) -> usize {
    guarded + secondary_guarded + 1
}

/// Ordered clone bookkeeping for one intercepted recording.
///
/// Exactly one clone is active at a time; each guarded command boundary
/// finalizes the active clone and moves the cursor to its successor, so that
/// clone *k* holds exactly the command span between dump points *k-1* and
/// *k*. Device-side recording (begin/end, state replay) is the owning
/// context's job; this type only tracks order and the cursor.
pub struct CloneSet {
    clones: Vec<vk::CommandBuffer>,
    cursor: usize,
    finalized: usize,
}

impl CloneSet {
    pub fn new(clones: Vec<vk::CommandBuffer>) -> Self {
        Self {
            clones,
            cursor: 0,
            finalized: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.clones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
    }

    /// The clone currently receiving commands. None once every clone has
    /// been finalized.
    pub fn active(&self) -> Option<vk::CommandBuffer> {
        (self.cursor < self.clones.len()).then(|| self.clones[self.cursor])
    }

    pub fn active_index(&self) -> usize {
        self.cursor
    }

    pub fn is_trailing_active(&self) -> bool {
        self.cursor + 1 == self.clones.len()
    }

    /// Finalize the active clone and advance to the next one. Returns the
    /// new active clone, or None when the finalized clone was the last.
    pub fn advance(&mut self) -> Option<vk::CommandBuffer> {
        if self.cursor < self.clones.len() {
            self.finalized += 1;
            self.cursor += 1;
        }
        self.active()
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized
    }

    /// All clones in submission order.
    pub fn iter(&self) -> impl Iterator<Item = vk::CommandBuffer> + '_ {
        self.clones.iter().copied()
    }

    pub fn get(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.clones.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    fn cb(raw: u64) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(raw)
    }

    #[test]
    fn clone_count_invariant() {
        assert_eq!(required_clone_count(0, 0), 1);
        assert_eq!(required_clone_count(3, 0), 4);
        assert_eq!(required_clone_count(2, 5), 8);
    }

    #[test]
    fn cursor_walks_clones_in_order() {
        let mut set = CloneSet::new(vec![cb(1), cb(2), cb(3)]);
        assert_eq!(set.active(), Some(cb(1)));
        assert!(!set.is_trailing_active());
        assert_eq!(set.advance(), Some(cb(2)));
        assert_eq!(set.advance(), Some(cb(3)));
        assert!(set.is_trailing_active());
        assert_eq!(set.advance(), None);
        assert_eq!(set.finalized_count(), 3);
        let order: Vec<_> = set.iter().collect();
        assert_eq!(order, vec![cb(1), cb(2), cb(3)]);
    }

    #[test]
    fn advance_past_end_is_stable() {
        let mut set = CloneSet::new(vec![cb(1)]);
        assert!(set.is_trailing_active());
        assert_eq!(set.advance(), None);
        assert_eq!(set.advance(), None);
        assert_eq!(set.finalized_count(), 1);
        assert_eq!(set.get(0), Some(cb(1)));
        assert_eq!(set.get(1), None);
    }
}
