//! Message passing between page contexts and the dispatcher.
//!
//! A page sends a [`Sample`] with [`PageChannel::send`]; the dispatcher acknowledges
//! receipt straight away and later pushes its [`PageMessage`] back through the
//! [`SenderRef`] that travelled with the request.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    domain::{Sample, Verdict},
    infrastructure::lifecycle::{Lifecycle, LifecycleListener},
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("page context was invalidated")]
    ContextInvalidated,
    #[error("dispatcher did not acknowledge the message")]
    NoReceiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(u64);

impl PageId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// Accepts both the displayed form (`page-3`) and the bare number.
impl FromStr for PageId {
    type Err = std::num::ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        raw.strip_prefix("page-").unwrap_or(raw).parse().map(Self)
    }
}

/// Directed messages from the dispatcher to one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageMessage {
    ShowBlock(Verdict),
    ShowWarn(Verdict),
    Allow(Verdict),
    ClassifierUnavailable,
}

impl PageMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ShowBlock(_) => "show_block",
            Self::ShowWarn(_) => "show_warn",
            Self::Allow(_) => "allow",
            Self::ClassifierUnavailable => "classifier_unavailable",
        }
    }
}

/// Route back to the page a request came from.
#[derive(Clone)]
pub struct SenderRef {
    page_id: PageId,
    context: LifecycleListener,
    inbox: mpsc::UnboundedSender<PageMessage>,
}

impl SenderRef {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn deliver(&self, message: PageMessage) -> Result<(), ChannelError> {
        if self.context.is_ended() {
            return Err(ChannelError::ContextInvalidated);
        }
        self.inbox
            .send(message)
            .map_err(|_| ChannelError::ContextInvalidated)
    }
}

pub struct AnalyzeRequest {
    pub sample: Sample,
    pub sender: SenderRef,
    pub ack: oneshot::Sender<()>,
}

#[derive(Clone)]
pub struct DispatcherHandle {
    requests: mpsc::Sender<AnalyzeRequest>,
    ack_timeout: Duration,
}

/// Creates the dispatcher's request queue.
pub fn dispatcher_channel(
    capacity: usize,
    ack_timeout: Duration,
) -> (DispatcherHandle, mpsc::Receiver<AnalyzeRequest>) {
    let (requests, receiver) = mpsc::channel(capacity.max(1));
    (
        DispatcherHandle {
            requests,
            ack_timeout,
        },
        receiver,
    )
}

/// A page context's end of the channel.
pub struct PageChannel {
    page_id: PageId,
    context: Lifecycle,
    dispatcher: DispatcherHandle,
    inbox: mpsc::UnboundedSender<PageMessage>,
}

impl PageChannel {
    pub fn open(
        dispatcher: DispatcherHandle,
        context: Lifecycle,
    ) -> (Self, mpsc::UnboundedReceiver<PageMessage>) {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let channel = Self {
            page_id: PageId::next(),
            context,
            dispatcher,
            inbox,
        };
        (channel, receiver)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Hands the sample to the dispatcher and waits only for its acknowledgement.
    pub async fn send(&self, sample: Sample) -> Result<(), ChannelError> {
        if self.context.is_ended() {
            return Err(ChannelError::ContextInvalidated);
        }

        let (ack, acked) = oneshot::channel();
        let request = AnalyzeRequest {
            sample,
            sender: SenderRef {
                page_id: self.page_id,
                context: self.context.subscribe(),
                inbox: self.inbox.clone(),
            },
            ack,
        };

        let ack_timeout = self.dispatcher.ack_timeout;
        let delivered = tokio::time::timeout(ack_timeout, async {
            self.dispatcher
                .requests
                .send(request)
                .await
                .map_err(|_| ChannelError::NoReceiver)?;
            acked.await.map_err(|_| ChannelError::NoReceiver)
        })
        .await;

        match delivered {
            Ok(result) => result,
            Err(_) => Err(ChannelError::NoReceiver),
        }
    }

    pub fn invalidate(&self) {
        self.context.end();
    }
}
