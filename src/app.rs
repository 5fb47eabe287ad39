use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::join_all;
use reqwest::Client;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};

use crate::{
    ai::ClassifierClient,
    config::AppConfig,
    console::{self, Console, ConsolePage},
    db::{self, settings::SettingsRepository, whitelist::WhitelistRepository},
    infrastructure::{
        directories::ResolvedPaths,
        lifecycle::Lifecycle,
        notifier::{LogNotifier, Notifier},
    },
    messaging::{dispatcher_channel, AnalyzeRequest, DispatcherHandle},
    page::{PageHandle, PageSession},
    tasks::dispatcher::Dispatcher,
    web_content::WebContentFetcher,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FocusGateApp {
    config: Arc<AppConfig>,
    dispatcher: Arc<Dispatcher>,
    dispatcher_handle: DispatcherHandle,
    requests: mpsc::Receiver<AnalyzeRequest>,
    settings: Arc<SettingsRepository>,
    whitelist: Arc<WhitelistRepository>,
    web_fetcher: Arc<WebContentFetcher>,
    shutdown: Lifecycle,
}

impl FocusGateApp {
    pub async fn initialize(config: AppConfig, paths: &ResolvedPaths, shutdown: Lifecycle) -> Result<Self> {
        let config = Arc::new(config);
        let pool = db::init_pool(&paths.db_path).await?;
        let settings = Arc::new(SettingsRepository::new(pool.clone()));
        let whitelist = Arc::new(WhitelistRepository::new(pool));

        if settings.seed_defaults().await? {
            tracing::info!(target: "db", "default settings stored");
        }
        let current = settings.apply_overrides(&config.settings_overrides).await?;
        tracing::info!(
            target: "db",
            send_snippet = current.send_snippet,
            snippet_max_chars = current.snippet_max_chars,
            "settings loaded"
        );

        let http_client = Client::builder()
            .user_agent(format!("focus-gate/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let classifier = Arc::new(ClassifierClient::new(
            http_client.clone(),
            config.classifier.clone(),
        ));
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let dispatcher = Arc::new(Dispatcher::new(classifier, settings.clone(), notifier));
        let (dispatcher_handle, requests) =
            dispatcher_channel(config.channel.capacity, config.channel.ack_timeout);
        let web_fetcher = Arc::new(WebContentFetcher::new(http_client, config.web.clone()));

        Ok(Self {
            config,
            dispatcher,
            dispatcher_handle,
            requests,
            settings,
            whitelist,
            web_fetcher,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let FocusGateApp {
            config,
            dispatcher,
            dispatcher_handle,
            requests,
            settings,
            whitelist,
            web_fetcher,
            shutdown,
        } = self;

        tracing::info!(target: "lifecycle", pages = config.pages.len(), "focus gate starting");

        let mut dispatcher_task = dispatcher.spawn(requests, shutdown.subscribe());

        let mut pages: Vec<(PageHandle, JoinHandle<()>)> = Vec::with_capacity(config.pages.len());
        let mut refreshers: Vec<JoinHandle<()>> = Vec::with_capacity(config.pages.len());
        let mut console_pages = Vec::with_capacity(config.pages.len());
        for raw_url in &config.pages {
            let host = match web_fetcher.load(raw_url).await {
                Ok(host) => Arc::new(host),
                Err(err) => {
                    tracing::warn!(target: "page", url = %raw_url, error = %err, "skipping page");
                    continue;
                }
            };
            refreshers.push(
                web_fetcher
                    .clone()
                    .spawn_refresher(host.clone(), shutdown.subscribe()),
            );
            let (session, handle) = PageSession::open(
                host,
                dispatcher_handle.clone(),
                whitelist.clone(),
                config.page.clone(),
            );
            let task = tokio::spawn(session.run(shutdown.subscribe()));
            console_pages.push(ConsolePage {
                url: raw_url.clone(),
                handle: handle.clone(),
            });
            pages.push((handle, task));
        }

        if pages.is_empty() {
            tracing::warn!(target: "lifecycle", "no pages to watch; set PAGE_URLS");
        }

        let console = Console::new(console_pages, settings, whitelist.clone());
        let console_task = match console::stdin_lines() {
            Ok(input) => Some(tokio::spawn(console.run(
                input,
                tokio::io::stdout(),
                shutdown.subscribe(),
            ))),
            Err(err) => {
                tracing::warn!(target: "console", error = %err, "console unavailable");
                None
            }
        };

        let mut shutdown_listener = shutdown.subscribe();
        shutdown_listener.ended().await;
        tracing::info!(target: "lifecycle", "shutdown requested");

        for (handle, _) in &pages {
            handle.close();
        }
        let sessions = join_all(pages.into_iter().map(|(_, task)| task).chain(refreshers));
        if timeout(SHUTDOWN_TIMEOUT, sessions).await.is_err() {
            tracing::warn!(
                target: "page",
                "page sessions did not stop within {:?}",
                SHUTDOWN_TIMEOUT
            );
        }

        if let Some(task) = console_task {
            match timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(Err(err))) => tracing::warn!(target: "console", error = %err, "console failed"),
                Ok(_) => {}
                Err(_) => tracing::warn!(target: "console", "console did not stop in time"),
            }
        }

        let dispatcher_sleep = tokio::time::sleep(SHUTDOWN_TIMEOUT);
        tokio::pin!(dispatcher_sleep);
        tokio::select! {
            res = &mut dispatcher_task => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "dispatcher", "dispatcher task panicked");
                    }
                }
            }
            _ = &mut dispatcher_sleep => {
                tracing::warn!(
                    target: "dispatcher",
                    "dispatcher did not stop within {:?}; aborting",
                    SHUTDOWN_TIMEOUT
                );
                dispatcher_task.abort();
            }
        }

        if timeout(SHUTDOWN_TIMEOUT, whitelist.close()).await.is_err() {
            tracing::warn!(
                target: "db",
                "database pool did not close within {:?}",
                SHUTDOWN_TIMEOUT
            );
        }

        tracing::info!(target: "lifecycle", "focus gate stopped");
        Ok(())
    }
}
