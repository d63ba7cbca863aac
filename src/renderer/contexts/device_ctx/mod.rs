pub mod debug;
pub mod device;
pub mod instance;
pub mod physical;
pub mod queue;
pub mod transfer_ctx;
