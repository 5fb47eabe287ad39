use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dom_smoothie::{Config as ReadabilityConfig, Readability, TextMode};
use reqwest::Client;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::WebContentConfig,
    infrastructure::lifecycle::LifecycleListener,
    page::{host::PageHost, SnapshotPage},
};

/// Outcome of one GET: where the request ended up and, if the page was usable,
/// its readable title and text.
struct Fetched {
    url: Url,
    content: Option<(String, String)>,
}

/// Loads watched pages over HTTP and reduces them to their readable text.
pub struct WebContentFetcher {
    client: Client,
    config: WebContentConfig,
}

impl WebContentFetcher {
    pub fn new(client: Client, config: WebContentConfig) -> Self {
        Self { client, config }
    }

    /// Builds the page host for `raw_url`. A page that cannot be loaded still yields
    /// a host, just one whose body is unreadable.
    pub async fn load(&self, raw_url: &str) -> Result<SnapshotPage> {
        let url = match Url::parse(raw_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => bail!("unsupported page URL {raw_url}"),
        };

        match self.fetch(&url).await {
            Ok(Fetched {
                url,
                content: Some((title, text)),
            }) => Ok(SnapshotPage::new(url.as_str(), title, text)),
            Ok(Fetched { url, content: None }) => Ok(SnapshotPage::unreadable(url.as_str())),
            Err(err) => {
                warn!(target: "web", error = %err, url = %url, "page fetch failed");
                Ok(SnapshotPage::unreadable(url.as_str()))
            }
        }
    }

    /// Re-fetches the page at its current URL. A redirect moves the page to the
    /// final URL, which the session sees as an in-page navigation. A failed fetch
    /// leaves the last good content in place.
    pub async fn refresh(&self, page: &SnapshotPage) -> Result<()> {
        let current = Url::parse(&page.url())
            .with_context(|| format!("page holds an invalid URL {}", page.url()))?;
        let fetched = self.fetch(&current).await?;

        if fetched.url != current {
            debug!(target: "web", from = %current, to = %fetched.url, "page moved");
            page.navigate(fetched.url.as_str());
        }
        if let Some((title, text)) = fetched.content {
            page.set_title(title);
            page.set_body(text);
        }
        Ok(())
    }

    /// Keeps `page` current until `shutdown` fires.
    pub fn spawn_refresher(
        self: Arc<Self>,
        page: Arc<SnapshotPage>,
        mut shutdown: LifecycleListener,
    ) -> JoinHandle<()> {
        let every = self.config.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.ended() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh(&page).await {
                            warn!(target: "web", error = %err, url = %page.url(), "page refresh failed");
                        }
                    }
                }
            }
        })
    }

    async fn fetch(&self, url: &Url) -> Result<Fetched> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?;

        let final_url = response.url().clone();
        if !response.status().is_success() {
            warn!(target: "web", status = %response.status(), url = %final_url, "page returned error status");
            return Ok(Fetched {
                url: final_url,
                content: None,
            });
        }

        let body = response.text().await?;
        let content = extract_readable(&body, &final_url, self.config.content_max_length);
        Ok(Fetched {
            url: final_url,
            content,
        })
    }
}

fn extract_readable(html: &str, url: &Url, max_chars: usize) -> Option<(String, String)> {
    let smoothie_cfg = ReadabilityConfig {
        text_mode: TextMode::Formatted,
        ..Default::default()
    };

    let mut readability = match Readability::new(html, Some(url.as_str()), Some(smoothie_cfg)) {
        Ok(reader) => reader,
        Err(err) => {
            warn!(target: "web", error = %err, url = %url, "Readability init failed");
            return None;
        }
    };

    let article = match readability.parse() {
        Ok(article) => article,
        Err(err) => {
            warn!(target: "web", error = %err, url = %url, "Readability parse failed");
            return None;
        }
    };

    let title = article.title.trim().to_string();
    let text: String = article
        .text_content
        .trim()
        .chars()
        .take(max_chars)
        .collect();
    Some((title, text))
}
