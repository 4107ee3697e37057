pub mod config;
pub mod connection_manager;
pub mod deposit;
pub mod engine;
pub mod engine_manager;
pub mod error;
pub mod payout;
pub mod session;
pub mod store;

pub use engine::{EngineConfig, SettlementEngine};
pub use engine_manager::{EngineHandle, EngineManager};
pub use error::{EngineError, EngineResult};
pub use store::Seed;
