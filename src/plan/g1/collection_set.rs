use crate::policy::region::{RegionFlags, RegionId, RegionSpace};

/// The regions chosen for one young or mixed pause: every eden region plus, for a mixed pause,
/// some tenured ones.
#[derive(Default, Debug)]
pub struct CollectionSet {
    young: Vec<RegionId>,
    tenured: Vec<RegionId>,
}

impl CollectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn assert_absent(&self, id: RegionId) {
        assert!(
            !self.contains(id),
            "{:?} added to the collection set twice",
            id
        );
    }

    pub fn add_young(&mut self, id: RegionId) {
        self.assert_absent(id);
        self.young.push(id);
    }

    pub fn add_tenured(&mut self, id: RegionId) {
        self.assert_absent(id);
        self.tenured.push(id);
    }

    pub fn young(&self) -> &[RegionId] {
        &self.young
    }

    pub fn tenured(&self) -> &[RegionId] {
        &self.tenured
    }

    pub fn contains(&self, id: RegionId) -> bool {
        self.young.contains(&id) || self.tenured.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.young.iter().chain(self.tenured.iter()).copied()
    }

    pub fn len(&self) -> usize {
        self.young.len() + self.tenured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mixed(&self) -> bool {
        !self.tenured.is_empty()
    }

    /// Flag the regions so that `in_gc_sweep_range` and the remembered-set scan see them.
    pub fn set_flags(&self, space: &RegionSpace) {
        for id in self.iter() {
            space.region(id).add_flag(RegionFlags::COLLECTION_SET);
        }
    }

    pub fn clear_flags(&self, space: &RegionSpace) {
        for id in self.iter() {
            space.region(id).rm_flag(RegionFlags::COLLECTION_SET);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn young_then_tenured() {
        let mut cset = CollectionSet::new();
        cset.add_young(RegionId(3));
        cset.add_tenured(RegionId(1));
        assert_eq!(cset.iter().collect::<Vec<_>>(), vec![RegionId(3), RegionId(1)]);
        assert!(cset.is_mixed());
        assert_eq!(cset.len(), 2);
    }

    #[test]
    #[should_panic(expected = "added to the collection set twice")]
    fn duplicate_region_is_fatal() {
        let mut cset = CollectionSet::new();
        cset.add_young(RegionId(2));
        cset.add_tenured(RegionId(2));
    }
}
