/*
    Data model - records and their payload trees
*/

pub mod record;
pub mod value;

pub use record::{now_millis, Record};
pub use value::{Value, ValueMap};
