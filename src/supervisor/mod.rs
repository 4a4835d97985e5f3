pub mod backoff;
pub mod factory;
pub mod health;
pub mod supervisor;

pub use backoff::*;
pub use factory::*;
pub use health::*;
pub use supervisor::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Initialization failed: {0}")]
    Init(String),
}
