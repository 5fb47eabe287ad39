use tokio::sync::watch;

/// A one-way "this context is over" signal.
///
/// Used for process shutdown and for tearing down a single page context: once
/// ended, every listener observes it and it can never be revived.
#[derive(Clone)]
pub struct Lifecycle {
    sender: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct LifecycleListener {
    receiver: watch::Receiver<bool>,
}

impl Lifecycle {
    pub fn new() -> (Self, LifecycleListener) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, LifecycleListener { receiver })
    }

    pub fn subscribe(&self) -> LifecycleListener {
        LifecycleListener {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn end(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.sender.borrow()
    }
}

impl LifecycleListener {
    pub async fn ended(&mut self) {
        if *self.receiver.borrow() {
            return;
        }
        // A dropped sender can never end the context; park forever instead.
        if self.receiver.wait_for(|ended| *ended).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.receiver.borrow()
    }
}

pub fn install_signal_handlers(shutdown: Lifecycle) {
    let ctrlc = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(target: "lifecycle", "ctrl-c received");
            ctrlc.end();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let term = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::terminate()) {
                sig.recv().await;
                tracing::info!(target: "lifecycle", "SIGTERM received");
                term.end();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn listeners_observe_end() {
        let (lifecycle, mut listener) = Lifecycle::new();
        let late = lifecycle.subscribe();
        assert!(!listener.is_ended());

        lifecycle.end();
        tokio::time::timeout(Duration::from_secs(1), listener.ended())
            .await
            .unwrap();
        assert!(late.is_ended());
        assert!(lifecycle.is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_lifecycle_never_ends_listener() {
        let (lifecycle, mut listener) = Lifecycle::new();
        drop(lifecycle);
        let waited = tokio::time::timeout(Duration::from_secs(5), listener.ended()).await;
        assert!(waited.is_err());
    }
}
