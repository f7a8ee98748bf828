pub mod deps;
pub mod sorter;
pub mod task;

pub use deps::unsatisfied;
pub use sorter::{plan, sort, sort_layers, ExecutionOrder};
pub use task::{normalize_id, AcceptanceCriterion, Task, DEFAULT_ORDINAL};
