use serde::{Deserialize, Serialize};

use crate::identity::InteractionStatus;
use crate::reconciler::SessionState;

/// Where guards send visitors who may not see a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Public landing view for unauthenticated visitors.
    pub landing_route: String,
    /// Default private view for authenticated visitors.
    pub home_route: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            landing_route: "/".into(),
            home_route: "/dashboard".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteGuard {
    /// Private views.
    RequireAuth,
    /// Sign-in and other guest-only views.
    RequireGuest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    /// Show a neutral placeholder; no decision can be made yet.
    Loading,
    Redirect(String),
}

impl RouteGuard {
    #[must_use]
    pub fn decide(
        self,
        state: &SessionState,
        status: InteractionStatus,
        config: &GuardConfig,
    ) -> GuardDecision {
        if status != InteractionStatus::None || state.is_loading {
            return GuardDecision::Loading;
        }
        match (self, state.is_authenticated) {
            (Self::RequireAuth, true) | (Self::RequireGuest, false) => GuardDecision::Render,
            (Self::RequireAuth, false) => GuardDecision::Redirect(config.landing_route.clone()),
            (Self::RequireGuest, true) => GuardDecision::Redirect(config.home_route.clone()),
        }
    }
}
