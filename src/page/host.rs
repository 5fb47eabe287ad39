use parking_lot::RwLock;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("page body is not readable: {0}")]
    Unreadable(String),
}

/// Read access to a live page, as the host environment exposes it.
pub trait PageHost: Send + Sync {
    fn url(&self) -> String;

    fn title(&self) -> String;

    fn body_text(&self) -> Result<String, ExtractionError>;

    fn domain(&self) -> String {
        domain_of(&self.url())
    }
}

pub fn domain_of(raw_url: &str) -> String {
    Url::parse(raw_url)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
struct Snapshot {
    url: String,
    title: String,
    body: Option<String>,
}

/// A page whose content is held in memory and can be changed underneath the
/// session, e.g. when a fetch completes or a single-page app swaps routes.
#[derive(Debug)]
pub struct SnapshotPage {
    state: RwLock<Snapshot>,
}

impl SnapshotPage {
    pub fn new(url: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(Snapshot {
                url: url.into(),
                title: title.into(),
                body: Some(body.into()),
            }),
        }
    }

    /// A page whose body cannot be read yet.
    pub fn unreadable(url: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(Snapshot {
                url: url.into(),
                title: String::new(),
                body: None,
            }),
        }
    }

    pub fn set_body(&self, body: impl Into<String>) {
        self.state.write().body = Some(body.into());
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.state.write().title = title.into();
    }

    /// In-page navigation: the URL changes without a new page context.
    pub fn navigate(&self, url: impl Into<String>) {
        self.state.write().url = url.into();
    }
}

impl PageHost for SnapshotPage {
    fn url(&self) -> String {
        self.state.read().url.clone()
    }

    fn title(&self) -> String {
        self.state.read().title.clone()
    }

    fn body_text(&self) -> Result<String, ExtractionError> {
        let state = self.state.read();
        state
            .body
            .clone()
            .ok_or_else(|| ExtractionError::Unreadable(state.url.clone()))
    }
}
