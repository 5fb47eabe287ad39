//! Everything that lives inside one page context.

pub mod gate;
pub mod host;
pub mod overlay;
pub mod sampler;
pub mod session;

pub use host::SnapshotPage;
pub use session::{PageHandle, PageSession};
