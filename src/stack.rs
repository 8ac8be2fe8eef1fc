use crate::NodeAddress;

/// Capacity of the traversal stack. Scenes whose worst-case requirement
/// exceeds it are rejected by `Scene::new`.
pub const BVH_STACK_SIZE: usize = 192;

/// Node waiting to be visited, with the distance at which the ray enters it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackEntry {
    pub address: NodeAddress,
    pub distance: f32,
}

impl StackEntry {
    pub const SENTINEL: Self = Self {
        address: NodeAddress::Sentinel,
        distance: -f32::INFINITY,
    };

    #[inline]
    pub const fn new(address: NodeAddress, distance: f32) -> Self {
        Self { address, distance }
    }
}

impl Default for StackEntry {
    fn default() -> Self {
        Self::SENTINEL
    }
}

/// Fixed-capacity stack. Overflowing it is a configuration error: a debug
/// assertion in debug builds, a bounds-check panic in release.
#[derive(Debug, Clone)]
pub struct TraversalStack<const N: usize = BVH_STACK_SIZE> {
    entries: [StackEntry; N],
    len: usize,
    high_water: usize,
}

impl<const N: usize> Default for TraversalStack<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TraversalStack<N> {
    #[inline]
    pub fn new() -> Self {
        Self {
            entries: [StackEntry::SENTINEL; N],
            len: 0,
            high_water: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, entry: StackEntry) {
        debug_assert!(self.len < N, "traversal stack overflow ({} entries)", N);
        self.entries[self.len] = entry;
        self.len += 1;
        self.high_water = self.high_water.max(self.len);
    }

    #[inline]
    pub fn push_sentinel(&mut self) {
        self.push(StackEntry::SENTINEL);
    }

    /// Pop the top entry. An empty stack reads as a sentinel.
    #[inline]
    pub fn pop(&mut self) -> StackEntry {
        if self.len == 0 {
            return StackEntry::SENTINEL;
        }
        self.len -= 1;
        self.entries[self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Deepest the stack has been since creation
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Push every child but the nearest, farthest first, and return the
    /// nearest. `children` must not be empty.
    #[inline]
    pub fn push_far_children(&mut self, children: &mut [StackEntry]) -> StackEntry {
        debug_assert!(!children.is_empty());
        children.sort_unstable_by(|a, b| b.distance.total_cmp(&a.distance));
        let Some((nearest, far)) = children.split_last() else {
            return StackEntry::SENTINEL;
        };
        for entry in far {
            self.push(*entry);
        }
        *nearest
    }
}
