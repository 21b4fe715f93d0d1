pub mod hooks;
pub mod manager;
pub mod model;
pub mod postgres;
pub mod repo;
pub mod sqlite;
pub mod validation;

pub use hooks::{HookContext, HookEvent, HookWarning, Hooks};
pub use manager::UserManager;
pub use model::{FieldSet, User, UserRead, UserSchema};
