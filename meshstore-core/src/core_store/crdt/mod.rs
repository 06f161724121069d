/*
    CRDT subsystem - Conflict-Free Replicated Data Types

    Vector clocks and the record merge engine.
*/

pub mod merge;
pub mod traits;
pub mod vector_clock;

pub use merge::{merge, merge_into};
pub use traits::Crdt;
pub use vector_clock::{ActorId, VectorClock};
