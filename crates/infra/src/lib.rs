//! Infrastructure layer: persistence adapters, permission cache, account
//! services and background workers.

pub mod accounts;
pub mod bootstrap;
pub mod cache;
pub mod catalog;
pub mod error;
mod hashing;
pub mod login;
pub mod notify;
pub mod roles;
pub mod store;
pub mod user_tokens;
pub mod users;
pub mod workers;

pub use accounts::AccountService;
pub use bootstrap::{AdminAccount, Bootstrap};
pub use catalog::{CatalogValidator, PermissionCatalog};
pub use error::{ServiceError, ServiceResult};
pub use login::{Authenticator, LoginTracker};
pub use notify::{LoggingNotifier, Notifier, RecordingNotifier};
pub use roles::RoleService;
pub use store::{InMemoryStore, PostgresStore, StoreError};
pub use user_tokens::OneTimeTokenStore;
pub use users::UserAdmin;
pub use workers::{TokenPurgeWorker, WorkerHandle};
