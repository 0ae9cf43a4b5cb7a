pub mod error;
pub mod manifest;
pub mod pool;
pub mod reconciler;
pub mod status;
pub mod sync;
pub mod traits;
