pub mod backends;
pub mod extractors;
pub mod password;
pub mod tokens;

pub use backends::{AuthBackend, BearerBackend, CookieBackend, CookieSettings, Credential, SameSite};
pub use extractors::{Authenticator, CurrentUser, Superuser, UserRequirement};
