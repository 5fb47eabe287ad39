pub mod client;
pub mod inference;

pub use client::ClassifierClient;
pub use inference::build_request;
