pub mod part_executor;

pub use part_executor::{PartExecutor, PartOutcome};
