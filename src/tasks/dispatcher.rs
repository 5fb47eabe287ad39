use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    ai::{build_request, ClassifierClient},
    db::settings::SettingsRepository,
    domain::{Sample, Settings, VerdictAction},
    infrastructure::{
        lifecycle::LifecycleListener,
        notifier::{Notification, Notifier},
    },
    messaging::{AnalyzeRequest, ChannelError, PageMessage, SenderRef},
};

/// Privileged side of the pipeline: classifies samples and routes verdicts back.
pub struct Dispatcher {
    classifier: Arc<ClassifierClient>,
    settings: Arc<SettingsRepository>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<ClassifierClient>,
        settings: Arc<SettingsRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            classifier,
            settings,
            notifier,
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        requests: mpsc::Receiver<AnalyzeRequest>,
        shutdown: LifecycleListener,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(requests, shutdown).await })
    }

    async fn run_loop(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<AnalyzeRequest>,
        mut shutdown: LifecycleListener,
    ) {
        tracing::info!(
            target: "dispatcher",
            endpoint = self.classifier.endpoint(),
            "dispatcher started"
        );
        loop {
            tokio::select! {
                _ = shutdown.ended() => break,
                request = requests.recv() => match request {
                    Some(request) => Self::accept(&self, request),
                    None => break,
                },
            }
        }
        tracing::info!(target: "dispatcher", "dispatcher stopped");
    }

    /// Acknowledges receipt, then classifies on an independent task.
    fn accept(this: &Arc<Self>, request: AnalyzeRequest) {
        let AnalyzeRequest { sample, sender, ack } = request;
        if ack.send(()).is_err() {
            tracing::debug!(
                target: "dispatcher",
                page = %sender.page_id(),
                "page stopped waiting for acknowledgement; request dropped"
            );
            return;
        }
        let this = this.clone();
        tokio::spawn(async move { this.handle(sample, sender).await });
    }

    pub async fn handle(&self, sample: Sample, sender: SenderRef) {
        let settings = match self.settings.get().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(target: "dispatcher", error = %err, "failed to read settings; using defaults");
                Settings::default()
            }
        };

        let request = build_request(&sample, &settings);
        let (message, notification) = match self.classifier.classify(&request).await {
            Ok(verdict) => {
                tracing::info!(
                    target: "dispatcher",
                    page = %sender.page_id(),
                    domain = %sample.domain,
                    action = %verdict.action,
                    tag = %verdict.tag,
                    "verdict received"
                );
                let notification = Notification::for_verdict(&sample.domain, &verdict);
                let message = match verdict.action {
                    VerdictAction::Block => PageMessage::ShowBlock(verdict),
                    VerdictAction::Warn => PageMessage::ShowWarn(verdict),
                    VerdictAction::Allow => PageMessage::Allow(verdict),
                };
                (message, notification)
            }
            Err(err) => {
                tracing::warn!(
                    target: "dispatcher",
                    page = %sender.page_id(),
                    domain = %sample.domain,
                    error = %err,
                    "classifier unavailable"
                );
                (PageMessage::ClassifierUnavailable, None)
            }
        };

        let kind = message.kind();
        match sender.deliver(message) {
            Ok(()) => {
                tracing::debug!(target: "channel", page = %sender.page_id(), kind, "message delivered");
                if let Some(notification) = notification {
                    self.notifier.notify(notification);
                }
            }
            Err(ChannelError::ContextInvalidated) => {
                tracing::debug!(target: "channel", page = %sender.page_id(), kind, "page context gone; message dropped");
            }
            Err(err) => {
                tracing::warn!(target: "channel", page = %sender.page_id(), kind, error = %err, "message delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Client;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use wiremock::{
        matchers::{body_json, body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        config::ClassifierConfig,
        db::init_pool,
        infrastructure::{
            lifecycle::Lifecycle,
            notifier::{testing::RecordingNotifier, NotificationKind},
        },
        messaging::{dispatcher_channel, DispatcherHandle, PageChannel},
    };

    struct Harness {
        handle: DispatcherHandle,
        settings: Arc<SettingsRepository>,
        notifier: Arc<RecordingNotifier>,
        shutdown: Lifecycle,
        _dir: tempfile::TempDir,
    }

    async fn harness(server: &MockServer, timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&dir.path().join("test.db")).await.unwrap();
        let settings = Arc::new(SettingsRepository::new(pool));
        let notifier = Arc::new(RecordingNotifier::default());
        let classifier = Arc::new(ClassifierClient::new(
            Client::new(),
            ClassifierConfig {
                endpoint: format!("{}/check", server.uri()),
                timeout,
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            classifier,
            settings.clone(),
            notifier.clone(),
        ));

        let (handle, requests) = dispatcher_channel(8, Duration::from_secs(1));
        let (shutdown, listener) = Lifecycle::new();
        dispatcher.spawn(requests, listener);

        Harness {
            handle,
            settings,
            notifier,
            shutdown,
            _dir: dir,
        }
    }

    async fn submit(
        handle: &DispatcherHandle,
        sample: Sample,
    ) -> (PageChannel, UnboundedReceiver<PageMessage>) {
        let (context, _) = Lifecycle::new();
        let (channel, inbox) = PageChannel::open(handle.clone(), context);
        channel.send(sample).await.unwrap();
        (channel, inbox)
    }

    async fn next(inbox: &mut UnboundedReceiver<PageMessage>) -> PageMessage {
        tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("dispatcher reply")
            .expect("inbox open")
    }

    #[tokio::test]
    async fn snippet_withheld_without_consent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .and(body_json(json!({
                "domain": "school.example",
                "title": "Chapter 4",
                "snippet": ""
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"action": "allow"})))
            .expect(1)
            .mount(&server)
            .await;
        let harness = harness(&server, Duration::from_secs(2)).await;

        let sample = Sample::new("school.example", "Chapter 4", "exam answers for chapter 4");
        let (_channel, mut inbox) = submit(&harness.handle, sample).await;

        assert!(matches!(next(&mut inbox).await, PageMessage::Allow(_)));
        assert!(harness.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn consented_snippet_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"snippet": "exam answers"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"action": "allow"})))
            .expect(1)
            .mount(&server)
            .await;
        let harness = harness(&server, Duration::from_secs(2)).await;
        harness
            .settings
            .set(&Settings {
                send_snippet: true,
                snippet_max_chars: 12,
            })
            .await
            .unwrap();

        let sample = Sample::new("school.example", "Chapter 4", "exam answers for chapter 4");
        let (_channel, mut inbox) = submit(&harness.handle, sample).await;
        assert!(matches!(next(&mut inbox).await, PageMessage::Allow(_)));
    }

    #[tokio::test]
    async fn block_verdict_is_routed_and_notified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"action": "block", "message": "gaming site"})),
            )
            .mount(&server)
            .await;
        let harness = harness(&server, Duration::from_secs(2)).await;

        let sample = Sample::new("example.com", "Play now", "");
        let (_channel, mut inbox) = submit(&harness.handle, sample).await;

        match next(&mut inbox).await {
            PageMessage::ShowBlock(verdict) => assert_eq!(verdict.reason, "gaming site"),
            other => panic!("expected show_block, got {other:?}"),
        }
        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Block);
        assert!(sent[0].message.contains("example.com"));
    }

    #[tokio::test]
    async fn missing_action_is_allow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tag": "?"})))
            .mount(&server)
            .await;
        let harness = harness(&server, Duration::from_secs(2)).await;

        let (_channel, mut inbox) =
            submit(&harness.handle, Sample::new("example.com", "t", "")).await;
        assert!(matches!(next(&mut inbox).await, PageMessage::Allow(_)));
    }

    #[tokio::test]
    async fn timeout_reports_unavailable_without_notification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"action": "block"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        let harness = harness(&server, Duration::from_millis(200)).await;

        let (_channel, mut inbox) =
            submit(&harness.handle, Sample::new("example.com", "t", "")).await;
        assert_eq!(next(&mut inbox).await, PageMessage::ClassifierUnavailable);
        assert!(harness.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn slow_page_does_not_hold_up_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"domain": "slow.example"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"action": "warn"}))
                    .set_delay(Duration::from_millis(1_500)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"domain": "fast.example"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"action": "allow"})))
            .mount(&server)
            .await;
        let harness = harness(&server, Duration::from_secs(3)).await;

        let (_slow, mut slow_inbox) =
            submit(&harness.handle, Sample::new("slow.example", "t", "")).await;
        let (_fast, mut fast_inbox) =
            submit(&harness.handle, Sample::new("fast.example", "t", "")).await;

        let fast = tokio::time::timeout(Duration::from_millis(1_000), fast_inbox.recv())
            .await
            .expect("fast page answered while slow page pending");
        assert!(matches!(fast, Some(PageMessage::Allow(_))));
        assert!(matches!(next(&mut slow_inbox).await, PageMessage::ShowWarn(_)));
    }

    #[tokio::test]
    async fn verdict_for_closed_page_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"action": "block", "reason": "late"}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let harness = harness(&server, Duration::from_secs(2)).await;

        let (channel, mut inbox) =
            submit(&harness.handle, Sample::new("example.com", "t", "")).await;
        channel.invalidate();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(inbox.try_recv().is_err());
        assert!(harness.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_requests() {
        let server = MockServer::start().await;
        let harness = harness(&server, Duration::from_secs(2)).await;
        harness.shutdown.end();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (context, _) = Lifecycle::new();
        let (channel, _inbox) = PageChannel::open(harness.handle.clone(), context);
        assert_eq!(
            channel.send(Sample::new("example.com", "t", "")).await,
            Err(ChannelError::NoReceiver)
        );
    }
}
