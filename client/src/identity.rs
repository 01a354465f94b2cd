//! Identity provider seam.
//!
//! Authentication itself happens elsewhere; the client only needs the
//! current identity and a stream of auth-state changes.

use std::sync::Arc;

use sipsync_core::types::Identity;
use tokio::sync::watch;
use tracing::info;

/// Source of the signed-in identity.
pub trait IdentityProvider: Send + Sync {
    /// The identity signed in right now, if any.
    fn current(&self) -> Option<Identity>;

    /// Auth-state stream; the current value is available immediately.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;

    /// Finalizes sign-out with the provider.
    fn sign_out(&self);
}

/// In-process identity provider driven by explicit sign-in/sign-out calls.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    state: Arc<watch::Sender<Option<Identity>>>,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdentity {
    /// A provider with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// A provider with `identity` already signed in.
    #[must_use]
    pub fn signed_in(identity: Identity) -> Self {
        let provider = Self::new();
        provider.sign_in(identity);
        provider
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(user_id = %identity.uid, "Signed in");
        self.state.send_replace(Some(identity));
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }

    fn sign_out(&self) {
        if let Some(previous) = self.state.send_replace(None) {
            info!(user_id = %previous.uid, "Signed out");
        }
    }
}
