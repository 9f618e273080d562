mod init;
mod slow;

pub use init::init_tracing;
pub use slow::warn_if_slow;
