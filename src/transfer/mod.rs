pub mod archive;
pub mod classify;
pub mod copy;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod status;

pub use models::TransferRequest;
pub use orchestrator::{Transfer, TransferContext};
pub use registry::{CancelRegistry, TransferId};
