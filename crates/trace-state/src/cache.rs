//! Session-wide edge geometry, write-once per edge.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use routewatch_core_types::{EdgeId, Polyline};

/// Union of geometry from the bulk sample and geometry discovered in
/// streamed events. The first polyline recorded for an edge wins; nothing is
/// evicted for the lifetime of the cache.
#[derive(Debug, Default)]
pub struct EdgeCoordinateCache {
    edges: DashMap<EdgeId, Arc<Polyline>>,
}

impl EdgeCoordinateCache {
    pub fn new() -> Self {
        Self {
            edges: DashMap::new(),
        }
    }

    /// Record geometry for `id` unless some is already known. Empty polylines
    /// are not recorded. Returns whether the cache changed.
    pub fn insert_if_absent(&self, id: EdgeId, coords: Polyline) -> bool {
        if coords.is_empty() {
            return false;
        }
        match self.edges.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(coords));
                true
            }
        }
    }

    /// Add every key of `batch` that is not cached yet; returns how many were added.
    pub fn merge<I>(&self, batch: I) -> usize
    where
        I: IntoIterator<Item = (EdgeId, Polyline)>,
    {
        let mut added = 0;
        for (id, coords) in batch {
            if self.insert_if_absent(id, coords) {
                added += 1;
            }
        }
        added
    }

    /// Geometry for `id`, or `None` when the edge has never been seen. Unknown
    /// edges are simply not drawn.
    pub fn lookup(&self, id: &EdgeId) -> Option<Arc<Polyline>> {
        self.edges.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &EdgeId) -> bool {
        self.edges.contains_key(id)
    }

    /// Geometry for each of `ids` that is known, in the given order.
    pub fn resolve<'a, I>(&self, ids: I) -> Vec<(EdgeId, Arc<Polyline>)>
    where
        I: IntoIterator<Item = &'a EdgeId>,
    {
        ids.into_iter()
            .filter_map(|id| self.lookup(id).map(|coords| (id.clone(), coords)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
