//! sea-orm entities for the planner tables.

pub mod prelude;

pub mod flashcard;
pub mod task;
pub mod user;
