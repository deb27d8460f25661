//! Task lifecycle: identity, status machine, state store, balance ledger,
//! and the orchestrator that ties the pipeline stages together.

pub mod ledger;
pub mod orchestrator;
pub mod status;
pub mod store;

pub use ledger::{BalanceLedger, MemoryLedger};
pub use orchestrator::{Services, TaskHandle, TaskManager, TaskOrchestrator, TaskView};
pub use status::{TaskId, TaskStatus};
pub use store::{MemoryTaskStore, TaskRecord, TaskStateStore};
