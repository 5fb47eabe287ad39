mod ai;
mod app;
mod config;
mod console;
mod db;
mod domain;
mod infrastructure;
mod messaging;
mod page;
mod tasks;
mod web_content;

use anyhow::Result;
use infrastructure::{directories, lifecycle, logging};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config.logging, &paths)?;

    let (shutdown, _) = lifecycle::Lifecycle::new();
    lifecycle::install_signal_handlers(shutdown.clone());

    let app = app::FocusGateApp::initialize(config, &paths, shutdown).await?;
    app.run().await
}
