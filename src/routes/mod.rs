//! Route groups and the assembler that folds the enabled ones into a router.

use std::collections::HashMap;
use std::fmt;

use axum::{http::Method, middleware, routing::MethodRouter, Router};
use tracing::{debug, info};

use crate::auth::extractors::{require_user, UserRequirement};
use crate::error::ConfigError;
use crate::state::AppState;

pub mod auth;
pub mod register;
pub mod reset;
pub mod users;
pub mod verify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteGroup {
    AuthBearer,
    AuthCookie,
    Register,
    ResetPassword,
    Verify,
    Users,
}

impl RouteGroup {
    /// Assembly order.
    pub const ALL: [RouteGroup; 6] = [
        RouteGroup::AuthBearer,
        RouteGroup::AuthCookie,
        RouteGroup::Register,
        RouteGroup::ResetPassword,
        RouteGroup::Verify,
        RouteGroup::Users,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RouteGroup::AuthBearer => "auth-jwt",
            RouteGroup::AuthCookie => "auth-cookie",
            RouteGroup::Register => "register",
            RouteGroup::ResetPassword => "reset-password",
            RouteGroup::Verify => "verify",
            RouteGroup::Users => "users",
        }
    }

    /// Fragment used in `USERGATE_ENABLE_{KEY}` and `USERGATE_{KEY}_PREFIX`.
    pub fn env_key(&self) -> &'static str {
        match self {
            RouteGroup::AuthBearer => "JWT",
            RouteGroup::AuthCookie => "COOKIE",
            RouteGroup::Register => "REGISTER",
            RouteGroup::ResetPassword => "RESET",
            RouteGroup::Verify => "VERIFY",
            RouteGroup::Users => "USERS",
        }
    }

    fn default_prefix(&self) -> &'static str {
        match self {
            RouteGroup::AuthBearer => "/auth/jwt",
            RouteGroup::AuthCookie => "/auth/cookie",
            RouteGroup::Users => "/users",
            RouteGroup::Register | RouteGroup::ResetPassword | RouteGroup::Verify => "",
        }
    }

    fn endpoints(&self, settings: &GroupSettings) -> Vec<Endpoint> {
        match self {
            RouteGroup::AuthBearer => auth::bearer_endpoints(settings.enable_refresh),
            RouteGroup::AuthCookie => auth::cookie_endpoints(),
            RouteGroup::Register => register::endpoints(),
            RouteGroup::ResetPassword => reset::endpoints(),
            RouteGroup::Verify => verify::endpoints(),
            RouteGroup::Users => users::endpoints(),
        }
    }
}

impl fmt::Display for RouteGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSettings {
    pub enabled: bool,
    /// Empty, or `/segment[/segment...]` without a trailing slash.
    pub prefix: String,
    /// Requirement applied to every route of the group.
    pub guard: Option<UserRequirement>,
    /// Bearer group only.
    pub enable_refresh: bool,
}

impl GroupSettings {
    pub fn defaults(group: RouteGroup) -> Self {
        Self {
            enabled: true,
            prefix: group.default_prefix().to_string(),
            guard: None,
            enable_refresh: group == RouteGroup::AuthBearer,
        }
    }

    pub fn merge(mut self, overrides: &GroupOverrides) -> Self {
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(prefix) = &overrides.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(guard) = overrides.guard {
            self.guard = guard;
        }
        if let Some(refresh) = overrides.enable_refresh {
            self.enable_refresh = refresh;
        }
        self
    }
}

/// Partial [`GroupSettings`]; `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOverrides {
    pub enabled: Option<bool>,
    pub prefix: Option<String>,
    pub guard: Option<Option<UserRequirement>>,
    pub enable_refresh: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteSettings {
    overrides: HashMap<RouteGroup, GroupOverrides>,
}

impl RouteSettings {
    /// Later calls for the same group override earlier ones field by field.
    pub fn set(mut self, group: RouteGroup, overrides: GroupOverrides) -> Self {
        let slot = self.overrides.entry(group).or_default();
        if overrides.enabled.is_some() {
            slot.enabled = overrides.enabled;
        }
        if overrides.prefix.is_some() {
            slot.prefix = overrides.prefix;
        }
        if overrides.guard.is_some() {
            slot.guard = overrides.guard;
        }
        if overrides.enable_refresh.is_some() {
            slot.enable_refresh = overrides.enable_refresh;
        }
        self
    }

    pub fn disable(self, group: RouteGroup) -> Self {
        self.set(
            group,
            GroupOverrides {
                enabled: Some(false),
                ..Default::default()
            },
        )
    }

    pub fn resolve(&self, group: RouteGroup) -> GroupSettings {
        let defaults = GroupSettings::defaults(group);
        match self.overrides.get(&group) {
            Some(o) => defaults.merge(o),
            None => defaults,
        }
    }
}

/// One path of a group, relative to its prefix.
pub(crate) struct Endpoint {
    pub path: &'static str,
    pub methods: Vec<Method>,
    pub handler: MethodRouter<AppState>,
}

impl Endpoint {
    pub(crate) fn new(path: &'static str, methods: &[Method], handler: MethodRouter<AppState>) -> Self {
        Self {
            path,
            methods: methods.to_vec(),
            handler,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedRoute {
    pub group: RouteGroup,
    pub method: Method,
    pub path: String,
}

/// Everything the assembler mounted, in mount order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<MountedRoute>,
}

impl RouteTable {
    pub fn iter(&self) -> impl Iterator<Item = &MountedRoute> {
        self.routes.iter()
    }

    pub fn contains(&self, method: &Method, path: &str) -> bool {
        self.routes
            .iter()
            .any(|r| &r.method == method && r.path == path)
    }

    pub fn group_of(&self, path: &str) -> Option<RouteGroup> {
        self.routes.iter().find(|r| r.path == path).map(|r| r.group)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn check_prefix(group: RouteGroup, prefix: &str) -> Result<(), ConfigError> {
    let bad = || ConfigError::BadPrefix {
        group: group.name(),
        prefix: prefix.to_string(),
    };
    if prefix.is_empty() {
        return Ok(());
    }
    if !prefix.starts_with('/') || prefix.ends_with('/') {
        return Err(bad());
    }
    let segments_ok = prefix[1..].split('/').all(|seg| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
    });
    if segments_ok {
        Ok(())
    } else {
        Err(bad())
    }
}

/// Folds the enabled groups, in [`RouteGroup::ALL`] order, into one router.
/// Fails if a prefix is malformed or two groups claim the same path.
pub fn assemble(
    state: AppState,
    settings: &RouteSettings,
) -> Result<(Router<AppState>, RouteTable), ConfigError> {
    let mut router = Router::new();
    let mut table = RouteTable::default();
    let mut claimed: HashMap<String, RouteGroup> = HashMap::new();

    for group in RouteGroup::ALL {
        let group_settings = settings.resolve(group);
        if !group_settings.enabled {
            debug!(group = %group, "route group disabled");
            continue;
        }
        check_prefix(group, &group_settings.prefix)?;

        let mut group_router = Router::new();
        for endpoint in group.endpoints(&group_settings) {
            let path = format!("{}{}", group_settings.prefix, endpoint.path);
            if let Some(first) = claimed.get(&path) {
                return Err(ConfigError::DuplicatePath {
                    path,
                    first: first.name(),
                    second: group.name(),
                });
            }
            claimed.insert(path.clone(), group);
            for method in endpoint.methods {
                table.routes.push(MountedRoute {
                    group,
                    method,
                    path: path.clone(),
                });
            }
            group_router = group_router.route(&path, endpoint.handler);
        }

        if let Some(requirement) = group_settings.guard {
            group_router = group_router.route_layer(middleware::from_fn_with_state(
                (state.clone(), requirement),
                require_user,
            ));
        }
        router = router.merge(group_router);
        info!(group = %group, prefix = %group_settings.prefix, "route group mounted");
    }

    Ok((router, table))
}
