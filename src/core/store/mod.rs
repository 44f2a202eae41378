pub mod atomic;
pub mod retention;
mod store;

pub use store::{
    Store, StorePaths, HISTORY_CAP, OUTAGE_CAP, SAMPLE_CAP, SAMPLE_RETENTION_MS,
};
