//! Operator console on stdin/stdout.
//!
//! Overlay changes on watched pages are printed as they happen, and the overlay
//! buttons, the snippet consent toggle and the whitelist are driven by slash
//! commands typed back.

use std::{io::BufRead, str::FromStr, sync::Arc, thread};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use crate::{
    db::{settings::SettingsRepository, whitelist::WhitelistRepository},
    infrastructure::lifecycle::LifecycleListener,
    messaging::PageId,
    page::{
        overlay::{OverlayAction, OverlayState},
        PageHandle,
    },
};

const HELP: &str = "\
/pages                 list watched pages and their overlay
/continue <page>       continue anyway on a blocked page
/whitelist <page>      always allow the blocked page's domain
/dismiss <page>        dismiss a warning
/whitelist             list whitelisted domains
/snippet on|off        share page text with the classifier
/settings              show current settings
/help                  this text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Pages,
    Act { page: PageId, action: OverlayAction },
    ListWhitelist,
    Snippet(bool),
    Settings,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command {0}; try /help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next();
        if words.next().is_some() {
            return Err(CommandError::Usage("one argument at most; try /help"));
        }

        let page = |usage: &'static str| {
            arg.and_then(|raw| raw.parse::<PageId>().ok())
                .ok_or(CommandError::Usage(usage))
        };

        match name.trim_start_matches('/') {
            "help" | "?" => Ok(Self::Help),
            "pages" => Ok(Self::Pages),
            "settings" => Ok(Self::Settings),
            "continue" => Ok(Self::Act {
                page: page("/continue <page>")?,
                action: OverlayAction::ContinueAnyway,
            }),
            "dismiss" => Ok(Self::Act {
                page: page("/dismiss <page>")?,
                action: OverlayAction::Dismiss,
            }),
            "whitelist" if arg.is_none() => Ok(Self::ListWhitelist),
            "whitelist" => Ok(Self::Act {
                page: page("/whitelist <page>")?,
                action: OverlayAction::WhitelistDomain,
            }),
            "snippet" => match arg.map(str::to_ascii_lowercase).as_deref() {
                Some("on") => Ok(Self::Snippet(true)),
                Some("off") => Ok(Self::Snippet(false)),
                _ => Err(CommandError::Usage("/snippet on|off")),
            },
            _ => Err(CommandError::Unknown(line.trim().to_string())),
        }
    }
}

/// A watched page as the console knows it.
pub struct ConsolePage {
    pub url: String,
    pub handle: PageHandle,
}

pub struct Console {
    pages: Vec<ConsolePage>,
    settings: Arc<SettingsRepository>,
    whitelist: Arc<WhitelistRepository>,
}

impl Console {
    pub fn new(
        pages: Vec<ConsolePage>,
        settings: Arc<SettingsRepository>,
        whitelist: Arc<WhitelistRepository>,
    ) -> Self {
        Self {
            pages,
            settings,
            whitelist,
        }
    }

    /// Prints overlay changes and answers commands until `shutdown` fires.
    /// A closed input only stops command handling.
    pub async fn run<W>(
        self,
        mut input: mpsc::UnboundedReceiver<String>,
        mut output: W,
        mut shutdown: LifecycleListener,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let (updates_tx, mut updates) = mpsc::unbounded_channel::<(PageId, OverlayState)>();
        for page in &self.pages {
            let page_id = page.handle.page_id();
            let mut overlay = page.handle.subscribe();
            let updates_tx = updates_tx.clone();
            tokio::spawn(async move {
                while overlay.changed().await.is_ok() {
                    let state = overlay.borrow_and_update().clone();
                    if updates_tx.send((page_id, state)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(updates_tx);

        let mut reading = true;
        loop {
            tokio::select! {
                _ = shutdown.ended() => break,
                Some((page_id, state)) = updates.recv() => {
                    let line = self.render(page_id, &state);
                    write_line(&mut output, &line).await?;
                }
                line = input.recv(), if reading => match line {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let reply = match line.parse::<Command>() {
                            Ok(command) => self
                                .execute(command)
                                .await
                                .unwrap_or_else(|err| format!("error: {err:#}")),
                            Err(err) => err.to_string(),
                        };
                        write_line(&mut output, &reply).await?;
                    }
                    None => {
                        tracing::debug!(target: "console", "console input closed");
                        reading = false;
                    }
                },
            }
        }
        Ok(())
    }

    pub async fn execute(&self, command: Command) -> Result<String> {
        match command {
            Command::Help => Ok(HELP.to_string()),
            Command::Pages => {
                if self.pages.is_empty() {
                    return Ok("no pages are being watched".to_string());
                }
                let lines: Vec<String> = self
                    .pages
                    .iter()
                    .map(|page| {
                        format!(
                            "{} {} [{}]",
                            page.handle.page_id(),
                            page.url,
                            describe(&page.handle.overlay())
                        )
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            Command::Act { page, action } => {
                let Some(target) = self.pages.iter().find(|p| p.handle.page_id() == page) else {
                    return Ok(format!("no such page {page}; see /pages"));
                };
                tracing::info!(target: "console", page = %page, ?action, "overlay action requested");
                if target.handle.act(action) {
                    Ok(format!("{page}: {} sent", action_label(action)))
                } else {
                    Ok(format!("{page} is no longer running"))
                }
            }
            Command::ListWhitelist => {
                let rows = self.whitelist.list().await?;
                if rows.is_empty() {
                    return Ok("whitelist is empty".to_string());
                }
                let lines: Vec<String> = rows
                    .iter()
                    .map(|row| format!("{} (since {})", row.domain, row.added_at.format("%Y-%m-%d %H:%M")))
                    .collect();
                Ok(lines.join("\n"))
            }
            Command::Snippet(enabled) => {
                let settings = self.settings.set_send_snippet(enabled).await?;
                tracing::info!(target: "db", send_snippet = settings.send_snippet, "snippet consent changed");
                Ok(format!(
                    "snippet sharing {}",
                    if settings.send_snippet { "on" } else { "off" }
                ))
            }
            Command::Settings => {
                let settings = self.settings.get().await?;
                Ok(format!(
                    "sendSnippet={} snippetMaxChars={}",
                    settings.send_snippet, settings.snippet_max_chars
                ))
            }
        }
    }

    fn render(&self, page_id: PageId, state: &OverlayState) -> String {
        let url = self
            .pages
            .iter()
            .find(|p| p.handle.page_id() == page_id)
            .map(|p| p.url.as_str())
            .unwrap_or_default();
        let hint = match state {
            OverlayState::None => String::new(),
            OverlayState::Blocking(_) => format!(" (/continue {page_id} or /whitelist {page_id})"),
            OverlayState::Warning(_) => format!(" (/dismiss {page_id})"),
        };
        format!("{page_id} {url}: {}{hint}", describe(state))
    }
}

fn describe(state: &OverlayState) -> String {
    match state {
        OverlayState::None => "no overlay".to_string(),
        OverlayState::Blocking(verdict) if verdict.reason.is_empty() => "blocked".to_string(),
        OverlayState::Blocking(verdict) => format!("blocked: {}", verdict.reason),
        OverlayState::Warning(verdict) if verdict.reason.is_empty() => "warning".to_string(),
        OverlayState::Warning(verdict) => format!("warning: {}", verdict.reason),
    }
}

fn action_label(action: OverlayAction) -> &'static str {
    match action {
        OverlayAction::ContinueAnyway => "continue anyway",
        OverlayAction::WhitelistDomain => "whitelist domain",
        OverlayAction::Dismiss => "dismiss",
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

/// Reads stdin on a dedicated thread so a pending read never holds up runtime
/// shutdown.
pub fn stdin_lines() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(target: "console", error = %err, "stdin read failed");
                        break;
                    }
                }
            }
        })
        .context("failed to start console input thread")?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Client;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{
        ai::ClassifierClient,
        config::{ClassifierConfig, GateConfig, PageConfig, SamplerConfig},
        db::init_pool,
        infrastructure::{lifecycle::Lifecycle, notifier::testing::RecordingNotifier},
        messaging::dispatcher_channel,
        page::{PageSession, SnapshotPage},
        tasks::dispatcher::Dispatcher,
    };

    #[test]
    fn parses_commands() {
        assert_eq!("/pages".parse::<Command>(), Ok(Command::Pages));
        assert_eq!("  /HELP ".parse::<Command>(), Ok(Command::Help));
        assert_eq!(
            "/continue page-2".parse::<Command>(),
            Ok(Command::Act {
                page: "2".parse().unwrap(),
                action: OverlayAction::ContinueAnyway,
            })
        );
        assert_eq!(
            "/whitelist 3".parse::<Command>(),
            Ok(Command::Act {
                page: "3".parse().unwrap(),
                action: OverlayAction::WhitelistDomain,
            })
        );
        assert_eq!("/whitelist".parse::<Command>(), Ok(Command::ListWhitelist));
        assert_eq!("/snippet ON".parse::<Command>(), Ok(Command::Snippet(true)));
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(matches!("/snippet maybe".parse::<Command>(), Err(CommandError::Usage(_))));
        assert!(matches!("/dismiss".parse::<Command>(), Err(CommandError::Usage(_))));
        assert!(matches!("/continue 1 2".parse::<Command>(), Err(CommandError::Usage(_))));
        assert!(matches!("/reload".parse::<Command>(), Err(CommandError::Unknown(_))));
    }

    struct Setup {
        console: Console,
        settings: Arc<SettingsRepository>,
        whitelist: Arc<WhitelistRepository>,
        page_id: PageId,
        shutdown: Lifecycle,
        _dir: tempfile::TempDir,
    }

    async fn setup(server: &MockServer) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&dir.path().join("test.db")).await.unwrap();
        let settings = Arc::new(SettingsRepository::new(pool.clone()));
        let whitelist = Arc::new(WhitelistRepository::new(pool));
        let classifier = Arc::new(ClassifierClient::new(
            Client::new(),
            ClassifierConfig {
                endpoint: format!("{}/check", server.uri()),
                timeout: Duration::from_secs(2),
            },
        ));

        let (shutdown, listener) = Lifecycle::new();
        let (dispatcher, requests) = dispatcher_channel(8, Duration::from_secs(1));
        Arc::new(Dispatcher::new(
            classifier,
            settings.clone(),
            Arc::new(RecordingNotifier::default()),
        ))
        .spawn(requests, listener);

        let url = "https://example.com/play";
        let page = Arc::new(SnapshotPage::new(
            url,
            "Games",
            "Play thousands of free online games instantly leaderboards tournaments daily rewards",
        ));
        let config = PageConfig {
            sampler: SamplerConfig {
                max_attempts: 2,
                retry_delay: Duration::from_millis(20),
                ..SamplerConfig::default()
            },
            gate: GateConfig {
                min_interval: Duration::from_millis(100),
            },
            initial_delay: Duration::from_millis(10),
            url_poll_interval: Duration::from_millis(25),
        };
        let (session, handle) = PageSession::open(page, dispatcher, whitelist.clone(), config);
        tokio::spawn(session.run(shutdown.subscribe()));

        let page_id = handle.page_id();
        let console = Console::new(
            vec![ConsolePage {
                url: url.to_string(),
                handle,
            }],
            settings.clone(),
            whitelist.clone(),
        );
        Setup {
            console,
            settings,
            whitelist,
            page_id,
            shutdown,
            _dir: dir,
        }
    }

    async fn next_line(lines: &mut Lines<BufReader<DuplexStream>>) -> String {
        tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("console went quiet")
            .unwrap()
            .expect("console output closed")
    }

    #[tokio::test]
    async fn snippet_toggle_persists_consent() {
        let server = MockServer::start().await;
        let setup = setup(&server).await;

        let reply = setup.console.execute(Command::Snippet(true)).await.unwrap();
        assert_eq!(reply, "snippet sharing on");
        assert!(setup.settings.get().await.unwrap().send_snippet);

        let reply = setup.console.execute(Command::Settings).await.unwrap();
        assert!(reply.contains("sendSnippet=true"));
    }

    #[tokio::test]
    async fn unknown_page_is_reported() {
        let server = MockServer::start().await;
        let setup = setup(&server).await;

        let reply = setup
            .console
            .execute(Command::Act {
                page: "page-999999".parse().unwrap(),
                action: OverlayAction::Dismiss,
            })
            .await
            .unwrap();
        assert!(reply.starts_with("no such page"));
    }

    #[tokio::test]
    async fn blocked_page_is_shown_and_whitelisted_from_console() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"action": "block", "reason": "gaming site"})),
            )
            .mount(&server)
            .await;
        let setup = setup(&server).await;
        let page_id = setup.page_id;

        let (input_tx, input) = mpsc::unbounded_channel();
        let (writer, reader) = tokio::io::duplex(4096);
        let console_task = tokio::spawn(setup.console.run(input, writer, setup.shutdown.subscribe()));
        let mut lines = BufReader::new(reader).lines();

        let shown = next_line(&mut lines).await;
        assert!(shown.contains("blocked: gaming site"), "{shown}");
        assert!(shown.contains(&format!("/whitelist {page_id}")));

        input_tx.send(format!("/whitelist {page_id}")).unwrap();
        let reply = next_line(&mut lines).await;
        assert_eq!(reply, format!("{page_id}: whitelist domain sent"));
        let cleared = next_line(&mut lines).await;
        assert!(cleared.contains("no overlay"), "{cleared}");
        assert!(setup.whitelist.contains("example.com").await.unwrap());

        input_tx.send("/whitelist".to_string()).unwrap();
        let listed = next_line(&mut lines).await;
        assert!(listed.starts_with("example.com"), "{listed}");

        setup.shutdown.end();
        tokio::time::timeout(Duration::from_secs(1), console_task)
            .await
            .expect("console did not stop")
            .unwrap()
            .unwrap();
    }
}
