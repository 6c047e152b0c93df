pub mod controller;
pub mod parser;
pub mod state;
pub mod worker;

pub use controller::{error_policy, reconcile_by_name, reconcile_network_performance_test};
pub use state::TestState;
pub use worker::{KubePodSubstrate, Worker, WorkerManager, WorkerPhase, WorkerSubstrate};
