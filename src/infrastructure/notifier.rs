use crate::domain::{Verdict, VerdictAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Block,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    /// Builds the user-facing notification for a verdict; `allow` raises none.
    pub fn for_verdict(domain: &str, verdict: &Verdict) -> Option<Self> {
        let (kind, title) = match verdict.action {
            VerdictAction::Allow => return None,
            VerdictAction::Block => (NotificationKind::Block, "Page blocked"),
            VerdictAction::Warn => (NotificationKind::Warn, "Stay focused"),
        };
        let message = if verdict.reason.is_empty() {
            format!("{domain} was flagged by the classifier")
        } else {
            format!("{domain}: {}", verdict.reason)
        };
        Some(Self {
            kind,
            title: title.to_string(),
            message,
        })
    }
}

/// Toast rendering is owned by the host; the dispatcher only hands notifications over.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Emits notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            target: "notify",
            kind = ?notification.kind,
            title = %notification.title,
            "{}",
            notification.message
        );
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_notification_names_domain() {
        let verdict = Verdict {
            action: VerdictAction::Block,
            tag: String::new(),
            reason: "gaming site".to_string(),
        };
        let notification = Notification::for_verdict("example.com", &verdict).unwrap();
        assert_eq!(notification.kind, NotificationKind::Block);
        assert!(notification.message.contains("example.com"));
        assert!(notification.message.contains("gaming site"));
    }

    #[test]
    fn allow_raises_nothing() {
        let verdict = Verdict {
            action: VerdictAction::Allow,
            tag: String::new(),
            reason: String::new(),
        };
        assert!(Notification::for_verdict("example.com", &verdict).is_none());
    }
}
