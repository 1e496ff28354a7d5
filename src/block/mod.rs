// Address blocking for the file endpoint
// Administrator-driven, with optional absolute expiry

pub mod registry;
pub mod types;

pub use registry::BlockRegistry;
pub use types::{BlockConfig, BlockEntry};
