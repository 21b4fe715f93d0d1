use std::sync::Arc;

use crate::auth::backends::{AuthBackend, BearerBackend, CookieBackend};
use crate::auth::extractors::Authenticator;
use crate::users::manager::UserManager;

/// Shared by every handler of the assembled routes.
#[derive(Clone)]
pub struct AppState {
    pub manager: UserManager,
    pub auth: Arc<Authenticator>,
    pub bearer: Arc<BearerBackend>,
    pub cookie: Arc<CookieBackend>,
}

impl AppState {
    pub fn new(manager: UserManager, bearer: BearerBackend, cookie: CookieBackend) -> Self {
        let bearer = Arc::new(bearer);
        let cookie = Arc::new(cookie);
        let auth = Authenticator::new(vec![
            bearer.clone() as Arc<dyn AuthBackend>,
            cookie.clone() as Arc<dyn AuthBackend>,
        ]);
        Self {
            manager,
            auth: Arc::new(auth),
            bearer,
            cookie,
        }
    }
}
