use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};

use crate::{
    config::PageConfig,
    db::whitelist::WhitelistRepository,
    infrastructure::lifecycle::{Lifecycle, LifecycleListener},
    messaging::{ChannelError, DispatcherHandle, PageChannel, PageId, PageMessage},
};

use super::{
    gate::{Admission, Gate},
    host::PageHost,
    overlay::{Overlay, OverlayAction, OverlayState, Transition},
    sampler::{Extraction, Sampler},
};

/// Control surface of a running page session.
#[derive(Clone)]
pub struct PageHandle {
    page_id: PageId,
    actions: mpsc::UnboundedSender<OverlayAction>,
    overlay: watch::Receiver<OverlayState>,
    context: Lifecycle,
}

impl PageHandle {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Clicks an overlay button. Returns `false` once the session has ended.
    pub fn act(&self, action: OverlayAction) -> bool {
        self.actions.send(action).is_ok()
    }

    pub fn overlay(&self) -> OverlayState {
        self.overlay.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayState> {
        self.overlay.clone()
    }

    /// Tears the page context down, as a full navigation or tab close would.
    pub fn close(&self) {
        self.context.end();
    }
}

/// The state owned by one page instance.
struct PageController {
    host: Arc<dyn PageHost>,
    sampler: Sampler,
    gate: Gate,
    channel: PageChannel,
    overlay: Overlay,
    published: watch::Sender<OverlayState>,
}

pub struct PageSession {
    controller: PageController,
    inbox: mpsc::UnboundedReceiver<PageMessage>,
    actions: mpsc::UnboundedReceiver<OverlayAction>,
    context: LifecycleListener,
    config: PageConfig,
}

impl PageSession {
    pub fn open(
        host: Arc<dyn PageHost>,
        dispatcher: DispatcherHandle,
        whitelist: Arc<WhitelistRepository>,
        config: PageConfig,
    ) -> (Self, PageHandle) {
        let (context, listener) = Lifecycle::new();
        let (channel, inbox) = PageChannel::open(dispatcher, context.clone());
        let (actions_tx, actions) = mpsc::unbounded_channel();
        let (published, overlay_rx) = watch::channel(OverlayState::None);

        let handle = PageHandle {
            page_id: channel.page_id(),
            actions: actions_tx,
            overlay: overlay_rx,
            context,
        };
        let controller = PageController {
            sampler: Sampler::new(host.clone(), config.sampler.clone()),
            gate: Gate::new(&config.gate),
            host,
            channel,
            overlay: Overlay::new(whitelist),
            published,
        };
        let session = Self {
            controller,
            inbox,
            actions,
            context: listener,
            config,
        };
        (session, handle)
    }

    pub async fn run(self, mut shutdown: LifecycleListener) {
        let PageSession {
            mut controller,
            mut inbox,
            mut actions,
            mut context,
            config,
        } = self;

        let mut extractions: JoinSet<Extraction> = JoinSet::new();
        let page_id = controller.channel.page_id();
        let mut last_url = controller.host.url();
        tracing::info!(target: "page", page = %page_id, url = %last_url, "page session started");

        let initial_load = sleep(config.initial_delay);
        tokio::pin!(initial_load);
        let mut loaded = false;

        let mut url_poll = interval_at(
            Instant::now() + config.url_poll_interval,
            config.url_poll_interval,
        );
        url_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.ended() => break,
                _ = context.ended() => break,
                _ = &mut initial_load, if !loaded => {
                    loaded = true;
                    controller.spawn_extraction(&mut extractions);
                }
                _ = url_poll.tick() => {
                    let url = controller.host.url();
                    if url != last_url {
                        tracing::info!(target: "page", page = %page_id, url = %url, "URL changed");
                        last_url = url;
                        // The previous route's content is stale once the URL moves on.
                        extractions.abort_all();
                        controller.spawn_extraction(&mut extractions);
                    }
                }
                Some(joined) = extractions.join_next() => match joined {
                    Ok(extraction) => controller.submit(extraction).await,
                    Err(err) if err.is_panic() => {
                        tracing::error!(target: "sampler", page = %page_id, "extraction task panicked");
                    }
                    Err(_) => {}
                },
                Some(message) = inbox.recv() => controller.on_message(message).await,
                Some(action) = actions.recv() => controller.on_action(action).await,
            }
        }

        controller.channel.invalidate();
        extractions.shutdown().await;
        tracing::info!(target: "page", page = %page_id, "page session ended");
    }
}

impl PageController {
    fn spawn_extraction(&self, extractions: &mut JoinSet<Extraction>) {
        let sampler = self.sampler.clone();
        extractions.spawn(async move { sampler.extract().await });
    }

    async fn submit(&mut self, extraction: Extraction) {
        let page_id = self.channel.page_id();
        let sample = match extraction {
            Extraction::Ready(sample) => sample,
            Extraction::GaveUp { .. } => return,
        };

        let key = match self.gate.admit(&sample) {
            Admission::Send(key) => key,
            Admission::Throttled => {
                tracing::debug!(target: "gate", page = %page_id, "throttled sample");
                return;
            }
            Admission::Duplicate => {
                tracing::debug!(target: "gate", page = %page_id, "snippet unchanged; not resending");
                return;
            }
        };

        let domain = sample.domain.clone();
        match self.channel.send(sample).await {
            Ok(()) => {
                self.gate.mark_sent(key);
                tracing::debug!(target: "channel", page = %page_id, domain = %domain, "sample sent");
            }
            Err(ChannelError::ContextInvalidated) => {
                tracing::debug!(target: "channel", page = %page_id, "page context gone; sample dropped");
            }
            Err(err) => {
                tracing::warn!(target: "channel", page = %page_id, error = %err, "sample not delivered");
            }
        }
    }

    async fn on_message(&mut self, message: PageMessage) {
        let domain = self.host.domain();
        let kind = message.kind();
        let transition = self.overlay.apply(&domain, message).await;
        self.publish(kind, transition);
    }

    async fn on_action(&mut self, action: OverlayAction) {
        let domain = self.host.domain();
        match self.overlay.act(&domain, action).await {
            Ok(transition) => self.publish("user_action", transition),
            Err(err) => {
                tracing::warn!(target: "overlay", domain = %domain, ?action, error = %err, "overlay action failed");
            }
        }
    }

    fn publish(&self, cause: &'static str, transition: Transition) {
        let state = self.overlay.state();
        tracing::info!(
            target: "overlay",
            page = %self.channel.page_id(),
            cause,
            ?transition,
            state = state.name(),
            "overlay updated"
        );
        if matches!(transition, Transition::Rendered | Transition::Removed) {
            self.published.send_replace(state.clone());
        }
    }
}
