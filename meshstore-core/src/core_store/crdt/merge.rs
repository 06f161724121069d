/*
    merge.rs - Deterministic reconciliation of two versions of one record

    Rules:
    1. Different timestamps: the newer version wins wholesale (payload, type,
       vector, tombstone flag).
    2. Equal timestamps: payloads are deep-joined (see `Value::join`); the
       optional singular fields keep the greater defined value; a tombstone
       beats a live version.
    3. The vector clock is always the key-wise maximum of both sides.

    Every rule is a join over a semilattice, so merge is commutative,
    associative and idempotent. Peers can apply versions in any order, any
    number of times, and still converge.
*/

use crate::core_store::crdt::VectorClock;
use crate::core_store::model::Record;
use std::cmp::Ordering;

/// Merge two versions of the same record.
///
/// `local` and `incoming` are expected to share an `id`; the result keeps
/// `local.id`.
pub fn merge(local: &Record, incoming: &Record) -> Record {
    let vector_clock = local.vector_clock.merged(&incoming.vector_clock);

    match local.timestamp.cmp(&incoming.timestamp) {
        Ordering::Greater => Record { vector_clock, ..local.clone() },
        Ordering::Less => Record { id: local.id.clone(), vector_clock, ..incoming.clone() },
        Ordering::Equal => merge_concurrent(local, incoming, vector_clock),
    }
}

fn merge_concurrent(local: &Record, incoming: &Record, vector_clock: VectorClock) -> Record {
    if local.deleted || incoming.deleted {
        return Record::tombstone(local.id.clone(), local.timestamp, vector_clock);
    }

    Record {
        id: local.id.clone(),
        data: local.data.join(&incoming.data),
        record_type: greater_option(&local.record_type, &incoming.record_type, |a, b| a.cmp(b)),
        vector: greater_option(&local.vector, &incoming.vector, compare_vectors),
        timestamp: local.timestamp,
        vector_clock,
        deleted: false,
    }
}

/// Defined beats undefined; two defined values keep the greater one
fn greater_option<T: Clone>(
    local: &Option<T>,
    incoming: &Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Option<T> {
    match (local, incoming) {
        (Some(a), Some(b)) => {
            if cmp(b, a) == Ordering::Greater {
                Some(b.clone())
            } else {
                Some(a.clone())
            }
        }
        (Some(a), None) => Some(a.clone()),
        (None, other) => other.clone(),
    }
}

fn compare_vectors(a: &Vec<f32>, b: &Vec<f32>) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.total_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Merge `incoming` into `local`, returning whether `local` changed
pub fn merge_into(local: &mut Record, incoming: &Record) -> bool {
    let merged = merge(local, incoming);
    if merged == *local {
        false
    } else {
        *local = merged;
        true
    }
}
