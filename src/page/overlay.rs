use std::sync::Arc;

use anyhow::Result;

use crate::{db::whitelist::WhitelistRepository, domain::Verdict, messaging::PageMessage};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OverlayState {
    #[default]
    None,
    Blocking(Verdict),
    Warning(Verdict),
}

impl OverlayState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Blocking(_) => "blocking",
            Self::Warning(_) => "warning",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Buttons rendered on the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    ContinueAnyway,
    WhitelistDomain,
    Dismiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Rendered,
    Removed,
    Unchanged,
    /// A second `show_*` arrived while an overlay is already up.
    AlreadyShowing,
    /// `show_block` for a whitelisted domain was acknowledged and ignored.
    Whitelisted,
}

pub struct Overlay {
    state: OverlayState,
    whitelist: Arc<WhitelistRepository>,
}

impl Overlay {
    pub fn new(whitelist: Arc<WhitelistRepository>) -> Self {
        Self {
            state: OverlayState::None,
            whitelist,
        }
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub async fn apply(&mut self, domain: &str, message: PageMessage) -> Transition {
        match message {
            PageMessage::ShowBlock(verdict) => {
                if !self.state.is_none() {
                    return Transition::AlreadyShowing;
                }
                match self.whitelist.contains(domain).await {
                    Ok(true) => Transition::Whitelisted,
                    Ok(false) => {
                        self.state = OverlayState::Blocking(verdict);
                        Transition::Rendered
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "overlay",
                            error = %err,
                            domain,
                            "whitelist lookup failed; not blocking"
                        );
                        Transition::Unchanged
                    }
                }
            }
            PageMessage::ShowWarn(verdict) => {
                if !self.state.is_none() {
                    return Transition::AlreadyShowing;
                }
                self.state = OverlayState::Warning(verdict);
                Transition::Rendered
            }
            PageMessage::Allow(_) | PageMessage::ClassifierUnavailable => self.clear(),
        }
    }

    pub async fn act(&mut self, domain: &str, action: OverlayAction) -> Result<Transition> {
        let blocking = matches!(self.state, OverlayState::Blocking(_));
        let warning = matches!(self.state, OverlayState::Warning(_));
        let transition = match action {
            OverlayAction::ContinueAnyway if blocking => self.clear(),
            OverlayAction::WhitelistDomain if blocking => {
                self.whitelist.add(domain).await?;
                self.clear()
            }
            OverlayAction::Dismiss if warning => self.clear(),
            _ => Transition::Unchanged,
        };
        Ok(transition)
    }

    fn clear(&mut self) -> Transition {
        if self.state.is_none() {
            Transition::Unchanged
        } else {
            self.state = OverlayState::None;
            Transition::Removed
        }
    }
}
