#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;

use campus_kernel_contracts::change::ChangeEvent;
use campus_kernel_contracts::{EntityId, OrderingRule, RealtimeEntity};

/// Ordered collection keyed by entity id. An id appears at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedEntityMap<T> {
    order: Vec<EntityId>,
    rows: BTreeMap<EntityId, T>,
}

impl<T> Default for OrderedEntityMap<T> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            rows: BTreeMap::new(),
        }
    }
}

impl<T: RealtimeEntity> OrderedEntityMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from a bulk fetch. Fetch order is kept unless the entity
    /// is sorted; a repeated id keeps its first position and its last row.
    pub fn from_rows(rows: Vec<T>) -> Self {
        let mut map = Self::new();
        for row in rows {
            let id = row.entity_id().clone();
            if map.rows.insert(id.clone(), row).is_none() {
                map.order.push(id);
            }
        }
        if T::ORDERING == OrderingRule::Sorted {
            let rows = &map.rows;
            map.order.sort_by(|a, b| match (rows.get(a), rows.get(b)) {
                (Some(x), Some(y)) => sorted_cmp(x, y),
                _ => a.cmp(b),
            });
        }
        map
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.rows.contains_key(id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.rows.get(id)
    }

    pub fn position(&self, id: &EntityId) -> Option<usize> {
        if !self.rows.contains_key(id) {
            return None;
        }
        self.order.iter().position(|candidate| candidate == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Replaces an existing row in place, or places a new one per the
    /// entity's ordering rule. Returns whether anything changed.
    pub fn upsert(&mut self, row: T) -> bool {
        let id = row.entity_id().clone();
        match self.rows.get_mut(&id) {
            Some(existing) if *existing == row => false,
            Some(existing) => {
                *existing = row;
                true
            }
            None => {
                let index = self.placement(&row);
                self.order.insert(index, id.clone());
                self.rows.insert(id, row);
                true
            }
        }
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<(usize, T)> {
        let row = self.rows.remove(id)?;
        let index = self.order.iter().position(|candidate| candidate == id)?;
        self.order.remove(index);
        Some((index, row))
    }

    /// Restores a row at a remembered position. Falls back to replacing in
    /// place when the id is already present.
    pub fn insert_at(&mut self, index: usize, row: T) -> bool {
        let id = row.entity_id().clone();
        if self.rows.contains_key(&id) {
            return self.upsert(row);
        }
        let index = index.min(self.order.len());
        self.order.insert(index, id.clone());
        self.rows.insert(id, row);
        true
    }

    /// Moves a row from a temporary id to its server id, keeping position.
    /// If the server id is already present the temporary row is dropped.
    pub fn rename(&mut self, from: &EntityId, to: &EntityId) -> bool {
        if from == to {
            return false;
        }
        if self.rows.contains_key(to) {
            return self.remove(from).is_some();
        }
        let Some(mut row) = self.rows.remove(from) else {
            return false;
        };
        row.set_entity_id(to.clone());
        if let Some(slot) = self.order.iter_mut().find(|candidate| *candidate == from) {
            *slot = to.clone();
        }
        self.rows.insert(to.clone(), row);
        true
    }

    /// Returns whether any row was dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> bool {
        let before = self.order.len();
        let rows = &mut self.rows;
        self.order.retain(|id| match rows.get(id) {
            Some(row) if keep(row) => true,
            _ => {
                rows.remove(id);
                false
            }
        });
        before != self.order.len()
    }

    fn placement(&self, row: &T) -> usize {
        match T::ORDERING {
            OrderingRule::Append => self.order.len(),
            OrderingRule::Prepend => 0,
            OrderingRule::Sorted => self.order.partition_point(|id| {
                self.rows
                    .get(id)
                    .is_some_and(|existing| sorted_cmp(existing, row) == Ordering::Less)
            }),
        }
    }
}

fn sorted_cmp<T: RealtimeEntity>(a: &T, b: &T) -> Ordering {
    a.order_cmp(b).then_with(|| a.entity_id().cmp(b.entity_id()))
}

/// Applies one feed event. Insert of a known id and update of an unknown id
/// both behave as upserts; delete of an unknown id is a no-op. Returns
/// whether the map changed.
pub fn apply_change<T: RealtimeEntity>(
    state: &mut OrderedEntityMap<T>,
    event: &ChangeEvent<T>,
) -> bool {
    match event {
        ChangeEvent::Insert(row) | ChangeEvent::Update(row) => state.upsert(row.clone()),
        ChangeEvent::Delete(id) => state.remove(id).is_some(),
    }
}

pub fn reconcile<T: RealtimeEntity>(
    state: &OrderedEntityMap<T>,
    event: &ChangeEvent<T>,
) -> OrderedEntityMap<T> {
    let mut next = state.clone();
    apply_change(&mut next, event);
    next
}
