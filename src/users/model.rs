use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::validation::{is_valid_email, normalize_email, PasswordPolicy, ValidationError, Violations};

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String, // argon2 PHC string
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

impl User {
    pub(crate) fn from_create(create: &UserCreate, hashed_password: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: create.email.clone(),
            hashed_password,
            is_active: create.is_active,
            is_superuser: create.is_superuser,
            is_verified: create.is_verified,
        }
    }
}

/// Public part of the user returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRead {
    pub id: Uuid,
    pub email: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

impl From<&User> for UserRead {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            is_active: u.is_active,
            is_superuser: u.is_superuser,
            is_verified: u.is_verified,
        }
    }
}

impl From<User> for UserRead {
    fn from(u: User) -> Self {
        UserRead::from(&u)
    }
}

/// A linked third-party account. Lookups only; no provider flow lives here.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OAuthAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub oauth_name: String,
    pub account_id: String,
    pub account_email: String,
}

/// Request body for registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserCreateRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_superuser: Option<bool>,
    #[serde(default)]
    pub is_verified: Option<bool>,
}

impl UserCreateRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Request body for partial updates. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdateRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_superuser: Option<bool>,
    #[serde(default)]
    pub is_verified: Option<bool>,
}

/// Which privileged flags a projection accepts from its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSet {
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

impl FieldSet {
    /// Public surfaces: privileged flags are dropped.
    pub const NONE: Self = Self {
        is_active: false,
        is_superuser: false,
        is_verified: false,
    };
    pub const ALL: Self = Self {
        is_active: true,
        is_superuser: true,
        is_verified: true,
    };

    fn pick(allowed: bool, value: Option<bool>) -> Option<bool> {
        if allowed {
            value
        } else {
            None
        }
    }
}

/// Validated registration input.
#[derive(Debug, Clone)]
pub struct UserCreate {
    email: String,
    password: String,
    is_active: bool,
    is_superuser: bool,
    is_verified: bool,
}

impl UserCreate {
    pub fn email(&self) -> &str {
        &self.email
    }
    pub fn password(&self) -> &str {
        &self.password
    }
    pub fn is_active(&self) -> bool {
        self.is_active
    }
    pub fn is_superuser(&self) -> bool {
        self.is_superuser
    }
    pub fn is_verified(&self) -> bool {
        self.is_verified
    }
}

/// Validated partial update.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    email: Option<String>,
    password: Option<String>,
    is_active: Option<bool>,
    is_superuser: Option<bool>,
    is_verified: Option<bool>,
}

impl UserUpdate {
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
    pub fn is_active(&self) -> Option<bool> {
        self.is_active
    }
    pub fn is_superuser(&self) -> Option<bool> {
        self.is_superuser
    }
    pub fn is_verified(&self) -> Option<bool> {
        self.is_verified
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.password.is_none()
            && self.is_active.is_none()
            && self.is_superuser.is_none()
            && self.is_verified.is_none()
    }
}

/// Builds the validated projections. Resolved once at startup from settings.
#[derive(Debug, Clone, Default)]
pub struct UserSchema {
    pub policy: PasswordPolicy,
}

impl UserSchema {
    pub fn new(policy: PasswordPolicy) -> Self {
        Self { policy }
    }

    pub fn create(
        &self,
        req: UserCreateRequest,
        fields: FieldSet,
    ) -> Result<UserCreate, ValidationError> {
        let email = normalize_email(&req.email);
        let mut violations = Violations::default();
        if !is_valid_email(&email) {
            violations.push("email", "is not a valid email address");
        }
        self.policy
            .check(&req.password, Some(&email), &mut violations);
        violations.into_result()?;

        Ok(UserCreate {
            email,
            password: req.password,
            is_active: FieldSet::pick(fields.is_active, req.is_active).unwrap_or(true),
            is_superuser: FieldSet::pick(fields.is_superuser, req.is_superuser).unwrap_or(false),
            is_verified: FieldSet::pick(fields.is_verified, req.is_verified).unwrap_or(false),
        })
    }

    pub fn update(
        &self,
        req: UserUpdateRequest,
        fields: FieldSet,
    ) -> Result<UserUpdate, ValidationError> {
        let email = req.email.as_deref().map(normalize_email);
        let mut violations = Violations::default();
        if let Some(email) = &email {
            if !is_valid_email(email) {
                violations.push("email", "is not a valid email address");
            }
        }
        if let Some(password) = &req.password {
            self.policy
                .check(password, email.as_deref(), &mut violations);
        }
        violations.into_result()?;

        Ok(UserUpdate {
            email,
            password: req.password,
            is_active: FieldSet::pick(fields.is_active, req.is_active),
            is_superuser: FieldSet::pick(fields.is_superuser, req.is_superuser),
            is_verified: FieldSet::pick(fields.is_verified, req.is_verified),
        })
    }
}
