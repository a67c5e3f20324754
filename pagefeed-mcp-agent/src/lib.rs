pub mod coordinator;
pub mod inject;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod server;
pub mod utils;
