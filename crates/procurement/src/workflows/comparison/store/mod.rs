//! Storage backends for [`ProcurementStore`](super::repository::ProcurementStore).

mod memory;
mod sqlite;

pub use memory::InMemoryProcurementStore;
pub use sqlite::SqliteProcurementStore;
