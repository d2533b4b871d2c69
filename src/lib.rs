pub mod common;
pub mod devices;
pub mod server;

pub use common::error::{CoordError, CoordResult};
pub use server::ScanOrchestrator;
