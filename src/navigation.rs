//! Route admission
//!
//! Decides whether a navigation may proceed given the session, the terms and
//! admin flags of the profile, and refreshes the plan status on every
//! authenticated navigation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::billing::PlanResolver;

pub const SPLASH_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/login";
pub const REGISTER_PATH: &str = "/register";
pub const HOME_PATH: &str = "/app/home";
pub const ONBOARDING_PATHS: [&str; 3] = ["/onboarding", "/onboarding2", "/onboarding3"];

const APP_PREFIX: &str = "/app";

/// Named pages under `/app`
const APP_PAGES: &[(&str, &str)] = &[
    ("home", "home"),
    ("cartilla", "cartilla"),
    ("agendar", "agendar"),
    ("contenido", "contenido"),
    ("perfil", "perfil"),
    ("perfil-editar", "perfil/editar"),
    ("foro", "foro"),
    ("foro-new", "foro/new"),
    ("chatbot", "chatbot"),
    ("diario", "diario"),
    ("diario-entradas", "diario/entradas"),
    ("mood-success", "mood-success"),
    ("notificaciones", "notificaciones"),
    ("premium", "premium"),
    ("premium-checkout", "premium/checkout"),
    ("premium-confirm", "premium/confirmado"),
    ("privacidad", "privacidad"),
    ("idioma", "idioma"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    pub path: String,
    pub requires_auth: bool,
    pub requires_admin: bool,
}

impl Route {
    /// Public route
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            requires_auth: false,
            requires_admin: false,
        }
    }

    /// Route that needs a signed-in user
    pub fn authenticated(name: &str, path: &str) -> Self {
        Self {
            requires_auth: true,
            ..Self::new(name, path)
        }
    }

    pub fn admin_only(mut self) -> Self {
        self.requires_auth = true;
        self.requires_admin = true;
        self
    }

    pub fn is_splash(&self) -> bool {
        self.name == "splash" || self.path == SPLASH_PATH
    }

    pub fn is_onboarding(&self) -> bool {
        ONBOARDING_PATHS.contains(&self.path.as_str())
    }
}

/// Outcome of resolving a path against the route table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Route(Route),
    Redirect(String),
}

/// Map a path to its route; `/app` goes home and unknown paths go to the splash
pub fn resolve_path(path: &str) -> Resolved {
    let path = match path.split(['?', '#']).next() {
        Some(p) if p.len() > 1 => p.trim_end_matches('/'),
        _ => SPLASH_PATH,
    };

    match path {
        SPLASH_PATH => return Resolved::Route(Route::new("splash", SPLASH_PATH)),
        LOGIN_PATH => return Resolved::Route(Route::new("login", LOGIN_PATH)),
        REGISTER_PATH => return Resolved::Route(Route::new("register", REGISTER_PATH)),
        APP_PREFIX => return Resolved::Redirect(HOME_PATH.to_string()),
        _ => {}
    }

    if let Some(onboarding) = ONBOARDING_PATHS.iter().find(|p| **p == path) {
        return Resolved::Route(Route::new(&onboarding[1..], onboarding));
    }

    if let Some(page) = path.strip_prefix("/app/") {
        if let Some((name, _)) = APP_PAGES.iter().find(|(_, sub)| *sub == page) {
            return Resolved::Route(Route::authenticated(name, path));
        }
        // foro/:id
        if let Some(id) = page.strip_prefix("foro/") {
            if !id.is_empty() && !id.contains('/') {
                return Resolved::Route(Route::authenticated("foro-view", path));
            }
        }
    }

    Resolved::Redirect(SPLASH_PATH.to_string())
}

/// Signed-in user as seen by the auth provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: Option<String>,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            access_token: None,
        }
    }
}

/// Current session lookup
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_session(&self) -> Option<Session>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "to", rename_all = "camelCase")]
pub enum Admission {
    Allow,
    Redirect(String),
}

impl Admission {
    fn redirect(path: &str) -> Self {
        Self::Redirect(path.to_string())
    }
}

pub struct NavigationGuard {
    sessions: Arc<dyn SessionProvider>,
    plan: Arc<PlanResolver>,
}

impl NavigationGuard {
    pub fn new(sessions: Arc<dyn SessionProvider>, plan: Arc<PlanResolver>) -> Self {
        Self { sessions, plan }
    }

    /// Resolve a raw path, then admit the matched route
    pub async fn admit_path(&self, path: &str) -> Admission {
        match resolve_path(path) {
            Resolved::Route(route) => self.admit(&route).await,
            Resolved::Redirect(to) => Admission::Redirect(to),
        }
    }

    pub async fn admit(&self, route: &Route) -> Admission {
        if route.is_splash() {
            return Admission::Allow;
        }

        let session = self.sessions.current_session().await;
        let Some(session) = session else {
            if route.requires_auth || route.is_onboarding() {
                debug!(path = %route.path, "Not signed in, redirecting to login");
                return Admission::redirect(LOGIN_PATH);
            }
            return Admission::Allow;
        };

        if route.path == LOGIN_PATH || route.path == REGISTER_PATH {
            return Admission::redirect(HOME_PATH);
        }

        self.plan.refresh(Some(&session.user_id)).await;
        let profile = self.plan.last_profile(&session.user_id);

        // No profile answer: terms are not enforced, admin access is
        if route.requires_auth && !route.is_onboarding() {
            if let Some(profile) = &profile {
                if !profile.terms_accepted() {
                    debug!(path = %route.path, "Terms not accepted, redirecting to onboarding");
                    return Admission::redirect(ONBOARDING_PATHS[0]);
                }
            }
        }

        if route.requires_admin && !profile.as_ref().is_some_and(|p| p.is_admin()) {
            debug!(path = %route.path, "Admin route denied");
            return Admission::redirect(HOME_PATH);
        }

        Admission::Allow
    }
}
