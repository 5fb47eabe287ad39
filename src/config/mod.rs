pub mod env;
mod loader;

pub use env::{
    AppConfig, ClassifierConfig, DirectoryConfig, GateConfig, LoggingConfig, PageConfig,
    SamplerConfig, SettingsOverrides, WebContentConfig,
};
pub use loader::load_config;
