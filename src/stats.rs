use std::ops::AddAssign;

/// Counters gathered by one traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraversalStats {
    pub nodes_visited: u64,
    pub leaves_visited: u64,
    pub primitives_tested: u64,
    pub instances_entered: u64,
    /// Deepest the traversal stack got, sentinels included
    pub max_stack_depth: u32,
}

impl AddAssign for TraversalStats {
    /// Sum the counters saturating, keep the deeper stack
    fn add_assign(&mut self, rhs: Self) {
        self.nodes_visited = self.nodes_visited.saturating_add(rhs.nodes_visited);
        self.leaves_visited = self.leaves_visited.saturating_add(rhs.leaves_visited);
        self.primitives_tested = self.primitives_tested.saturating_add(rhs.primitives_tested);
        self.instances_entered = self.instances_entered.saturating_add(rhs.instances_entered);
        self.max_stack_depth = self.max_stack_depth.max(rhs.max_stack_depth);
    }
}
