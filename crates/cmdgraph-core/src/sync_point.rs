//! Arena of native dependency tokens indexed by sync-point id.

use crate::error::{GraphError, GraphResult};
use crate::types::SyncPoint;

/// Owns every native token a command buffer has handed out as a sync point.
///
/// Ids are dense and never reused; there is no removal.
#[derive(Debug)]
pub struct SyncPointRegistry<N> {
    owner: u64,
    nodes: Vec<N>,
}

impl<N: Clone> SyncPointRegistry<N> {
    pub fn new(owner: u64) -> Self {
        Self { owner, nodes: Vec::new() }
    }

    /// Id the next `register` call will return.
    #[must_use]
    pub fn next_id(&self) -> u32 {
        self.nodes.len() as u32
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Store `node` under the next id.
    pub fn register(&mut self, node: N) -> SyncPoint {
        let sp = SyncPoint::new(self.owner, self.next_id());
        self.nodes.push(node);
        sp
    }

    /// Look up every id in `points`; any miss fails the whole batch.
    pub fn resolve(&self, points: &[SyncPoint]) -> GraphResult<Vec<N>> {
        points.iter().map(|sp| self.get(*sp).cloned()).collect()
    }

    /// Native token for one sync point.
    pub fn get(&self, sp: SyncPoint) -> GraphResult<&N> {
        if sp.buffer() != self.owner {
            return Err(GraphError::InvalidDependency { sync_point: sp.id() });
        }
        self.nodes.get(sp.id() as usize).ok_or(GraphError::InvalidDependency { sync_point: sp.id() })
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ids_start_at_zero() {
        let mut reg = SyncPointRegistry::new(1);
        assert_eq!(reg.register("a").id(), 0);
        assert_eq!(reg.register("b").id(), 1);
        assert_eq!(reg.next_id(), 2);
    }

    #[test]
    fn foreign_sync_point_does_not_resolve() {
        let mut ours = SyncPointRegistry::new(1);
        let mut theirs = SyncPointRegistry::new(2);
        ours.register(10u32);
        let foreign = theirs.register(20u32);
        assert_eq!(foreign.id(), 0);
        assert_eq!(ours.resolve(&[foreign]), Err(GraphError::InvalidDependency { sync_point: 0 }));
    }

    #[test]
    fn one_bad_id_fails_whole_batch() {
        let mut reg = SyncPointRegistry::new(3);
        let a = reg.register(1u8);
        let out_of_range = SyncPoint::new(3, 5);
        assert!(reg.resolve(&[a, out_of_range]).is_err());
        assert_eq!(reg.resolve(&[a, a]).unwrap(), vec![1, 1]);
    }

    proptest! {
        #[test]
        fn prop_register_returns_dense_ids(n in 0usize..200) {
            let mut reg = SyncPointRegistry::new(9);
            for i in 0..n {
                let sp = reg.register(i);
                prop_assert_eq!(sp.id() as usize, i);
                prop_assert_eq!(*reg.get(sp).unwrap(), i);
            }
            prop_assert_eq!(reg.len(), n);
        }
    }
}
