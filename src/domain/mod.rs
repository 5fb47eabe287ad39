pub mod sample;
pub mod types;

pub use sample::Sample;
pub use types::{Settings, Verdict, VerdictAction};
