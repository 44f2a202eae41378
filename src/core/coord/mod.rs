mod coordinator;
pub mod lock;
pub mod shared;

pub use coordinator::{Coordinator, CoordinatorSettings, Role};
