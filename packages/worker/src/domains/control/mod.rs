pub mod store;

pub use store::{ControlStore, PgControlStore, WorkerStatusRow};
