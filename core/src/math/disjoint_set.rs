/// Union-find over dense indices with path halving and union by size.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    pub fn find(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            self.parent[index] = self.parent[self.parent[index]];
            index = self.parent[index];
        }
        index
    }

    /// Joins the sets containing `a` and `b`; returns false when already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let mut root_a = self.find(a);
        let mut root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        // Lower root index wins ties so labels do not depend on union order.
        if self.size[root_a] < self.size[root_b]
            || (self.size[root_a] == self.size[root_b] && root_b < root_a)
        {
            std::mem::swap(&mut root_a, &mut root_b);
        }
        self.parent[root_b] = root_a;
        self.size[root_a] += self.size[root_b];
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_joins_transitively() {
        let mut set = DisjointSet::new(5);
        assert!(set.union(0, 1));
        assert!(set.union(3, 4));
        assert!(set.union(1, 4));
        assert!(!set.union(0, 3));
        assert_eq!(set.find(0), set.find(4));
        assert_ne!(set.find(2), set.find(0));
    }
}
