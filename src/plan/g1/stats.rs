use enum_map::{Enum, EnumMap};

/// The kind of a finished collection pause.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum GCKind {
    Young,
    Mixed,
    Full,
}

/// Counters kept across collections.
#[derive(Clone, Debug, Default)]
pub struct GCStats {
    pub collections: EnumMap<GCKind, usize>,
    pub young_moved_bytes: usize,
    pub young_moved_objects: usize,
    pub young_freed_bytes: usize,
    pub young_freed_objects: usize,
    pub tenured_moved_bytes: usize,
    pub tenured_moved_objects: usize,
    pub tenured_freed_bytes: usize,
    pub tenured_freed_objects: usize,
}

impl GCStats {
    pub fn total_collections(&self) -> usize {
        self.collections.values().sum()
    }

    pub(super) fn record_moved(&mut self, young: bool, bytes: usize, objects: usize) {
        if young {
            self.young_moved_bytes += bytes;
            self.young_moved_objects += objects;
        } else {
            self.tenured_moved_bytes += bytes;
            self.tenured_moved_objects += objects;
        }
    }

    pub(super) fn record_freed(&mut self, young: bool, bytes: usize, objects: usize) {
        if young {
            self.young_freed_bytes += bytes;
            self.young_freed_objects += objects;
        } else {
            self.tenured_freed_bytes += bytes;
            self.tenured_freed_objects += objects;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_kind() {
        let mut stats = GCStats::default();
        stats.collections[GCKind::Young] += 2;
        stats.collections[GCKind::Full] += 1;
        stats.record_moved(true, 64, 2);
        stats.record_freed(false, 128, 3);
        assert_eq!(stats.total_collections(), 3);
        assert_eq!(stats.collections[GCKind::Mixed], 0);
        assert_eq!((stats.young_moved_bytes, stats.young_moved_objects), (64, 2));
        assert_eq!((stats.tenured_freed_bytes, stats.tenured_freed_objects), (128, 3));
    }
}
