pub mod models;
pub mod users;

pub use models::{Role, User};
pub use users::{CredentialStore, UserRepository};
