//! Push ordering.
//!
//! Pending upserts are sorted so that every referenced parent is submitted
//! before the rows that point at it. Pending tombstones go the other way:
//! children are deleted before their parents.

use crate::error::ConvertError;
use crate::kind::RecordKind;
use crate::model::Row;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Rows already stored locally that pending rows may reference.
///
/// Built by the caller before planning. Stored items also record their
/// parent, so a reparent that closes a loop through rows outside the batch
/// is caught.
#[derive(Debug, Default, Clone)]
pub struct StoredRefs {
    present: HashSet<(RecordKind, String)>,
    item_parents: HashMap<String, Option<String>>,
}

impl StoredRefs {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stored row.
    pub fn insert(&mut self, kind: RecordKind, id: impl Into<String>) {
        self.present.insert((kind, id.into()));
    }

    /// Records a stored item and its parent link.
    pub fn insert_item(&mut self, id: impl Into<String>, parent_id: Option<String>) {
        let id = id.into();
        self.present.insert((RecordKind::Item, id.clone()));
        self.item_parents.insert(id, parent_id);
    }

    /// Returns true if the row is stored.
    pub fn contains(&self, kind: RecordKind, id: &str) -> bool {
        self.present.contains(&(kind, id.to_string()))
    }

    /// Returns true if the item's parent link is known.
    pub fn knows_parent(&self, id: &str) -> bool {
        self.item_parents.contains_key(id)
    }

    fn parent_of(&self, id: &str) -> Option<&str> {
        self.item_parents.get(id).and_then(|parent| parent.as_deref())
    }
}

/// Submission plan for one push.
#[derive(Debug, Default)]
pub struct PushPlan {
    /// Live rows to upsert, parents first.
    pub upserts: Vec<Row>,
    /// Tombstones to delete remotely, children first.
    pub deletes: Vec<Row>,
    /// Rows that cannot be pushed this cycle.
    pub rejected: Vec<(Row, ConvertError)>,
}

impl PushPlan {
    /// Returns true if nothing needs to be submitted.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Orders pending rows for submission.
///
/// A reference is satisfied if its target is either in `stored` or pending
/// in the same batch; otherwise the row is rejected as dangling. Rows that
/// sit on a reference cycle are rejected as cyclic, including parent chains
/// that loop through stored items outside the batch. Rejections propagate
/// to rows that depend on a rejected row.
pub fn plan_push(pending: Vec<Row>, stored: &StoredRefs) -> PushPlan {
    let (tombstones, live): (Vec<Row>, Vec<Row>) =
        pending.into_iter().partition(|row| row.meta().is_deleted());

    let (upserts, rejected) = order_upserts(live, stored);
    PushPlan {
        upserts,
        deletes: order_deletes(tombstones),
        rejected,
    }
}

fn dangling(row: &Row, target_kind: RecordKind, target_id: &str) -> ConvertError {
    ConvertError::DanglingReference {
        kind: row.kind(),
        id: row.id().to_string(),
        target_kind,
        target_id: target_id.to_string(),
    }
}

fn cyclic(row: &Row) -> ConvertError {
    ConvertError::CyclicReference {
        kind: row.kind(),
        id: row.id().to_string(),
    }
}

/// Follows the parent chain of a pending item, preferring pending parent
/// links over stored ones. Returns true if the chain leads back to `row`.
fn loops_back(
    row: &Row,
    pending_parents: &HashMap<&str, Option<&str>>,
    stored: &StoredRefs,
) -> bool {
    let Row::Item(item) = row else {
        return false;
    };
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = item.parent_id.as_deref();
    while let Some(id) = current {
        if id == item.id {
            return true;
        }
        if !visited.insert(id) {
            return false;
        }
        current = match pending_parents.get(id) {
            Some(parent) => *parent,
            None => stored.parent_of(id),
        };
    }
    false
}

fn order_upserts(rows: Vec<Row>, stored: &StoredRefs) -> (Vec<Row>, Vec<(Row, ConvertError)>) {
    let count = rows.len();
    let index: HashMap<(RecordKind, &str), usize> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| ((row.kind(), row.id()), i))
        .collect();
    let pending_parents: HashMap<&str, Option<&str>> = rows
        .iter()
        .filter_map(|row| match row {
            Row::Item(item) => Some((item.id.as_str(), item.parent_id.as_deref())),
            _ => None,
        })
        .collect();

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut failure: Vec<Option<ConvertError>> = vec![None; count];
    for (i, row) in rows.iter().enumerate() {
        if loops_back(row, &pending_parents, stored) {
            failure[i] = Some(cyclic(row));
            continue;
        }
        for (target_kind, target_id) in row.references() {
            if target_kind == row.kind() && target_id == row.id() {
                failure[i] = Some(cyclic(row));
                break;
            }
            match index.get(&(target_kind, target_id)) {
                Some(&j) => deps[i].push(j),
                None if stored.contains(target_kind, target_id) => {}
                None => {
                    failure[i] = Some(dangling(row, target_kind, target_id));
                    break;
                }
            }
        }
    }

    // Kahn's algorithm; ties broken by kind rank, then input order.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut waiting = vec![0usize; count];
    for i in 0..count {
        if failure[i].is_some() {
            continue;
        }
        for &j in &deps[i] {
            dependents[j].push(i);
            waiting[i] += 1;
        }
    }

    let rank = |i: usize| rows[i].kind().dependency_rank();
    let mut ready: BTreeSet<(usize, usize)> = (0..count)
        .filter(|&i| failure[i].is_none() && waiting[i] == 0)
        .map(|i| (rank(i), i))
        .collect();
    let mut emitted = vec![false; count];
    let mut order = Vec::with_capacity(count);
    while let Some((_, i)) = ready.pop_first() {
        emitted[i] = true;
        order.push(i);
        for &k in &dependents[i] {
            waiting[k] -= 1;
            if waiting[k] == 0 {
                ready.insert((rank(k), k));
            }
        }
    }

    // Whatever is left either depends on a rejected row or sits on a cycle.
    let mut blocked: Vec<bool> = failure.iter().map(Option::is_some).collect();
    loop {
        let mut changed = false;
        for i in 0..count {
            if emitted[i] || blocked[i] {
                continue;
            }
            if let Some(&j) = deps[i].iter().find(|&&j| blocked[j]) {
                failure[i] = Some(dangling(&rows[i], rows[j].kind(), rows[j].id()));
                blocked[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for i in 0..count {
        if !emitted[i] && failure[i].is_none() {
            failure[i] = Some(cyclic(&rows[i]));
        }
    }

    let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
    let mut upserts = Vec::with_capacity(order.len());
    for i in order {
        if let Some(row) = slots[i].take() {
            upserts.push(row);
        }
    }
    let rejected = slots
        .into_iter()
        .zip(failure)
        .filter_map(|(slot, err)| Some((slot?, err?)))
        .collect();
    (upserts, rejected)
}

fn order_deletes(mut rows: Vec<Row>) -> Vec<Row> {
    let parents: HashMap<String, Option<String>> = rows
        .iter()
        .filter_map(|row| match row {
            Row::Item(item) => Some((item.id.clone(), item.parent_id.clone())),
            _ => None,
        })
        .collect();

    // Depth among the tombstoned items only; bounded walk guards against cycles.
    let depth = |row: &Row| -> usize {
        let Row::Item(item) = row else {
            return 0;
        };
        let mut depth = 0;
        let mut current = item.parent_id.as_deref();
        while let Some(parent) = current {
            if depth > parents.len() {
                break;
            }
            match parents.get(parent) {
                Some(next) => {
                    depth += 1;
                    current = next.as_deref();
                }
                None => break,
            }
        }
        depth
    };

    rows.sort_by_cached_key(|row| (Reverse(row.kind().dependency_rank()), Reverse(depth(row))));
    rows
}
