//! `warden-auth`: pure authentication/authorization model.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod codec;
pub mod guard;
pub mod lockout;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod user;
pub mod user_token;

pub use authorize::{
    AccessValidator, AuthorizationExplanation, AuthzError, TokenPermissionValidator, authorize,
    explain_authorization, is_authorized,
};
pub use claims::{CredentialError, TokenData};
pub use codec::{IssuedToken, IssuerSettings, TokenCodec, TokenIssuer};
pub use guard::{GuardError, ResourceGuard};
pub use lockout::{DEFAULT_MAX_LOGIN_ATTEMPTS, LockoutPolicy, LoginAttemptOutcome};
pub use password::{LoginError, PasswordError, hash_password, validate_password, verify_password};
pub use permissions::{ActionName, PermissionSet, ResourceName, ResourcePermission, RolePermission};
pub use principal::Principal;
pub use roles::{Role, normalize_role_name};
pub use user::{AccountStatus, LoginRegister, NewUser, StoredUser, User};
pub use user_token::{TokenError, TokenScope, UserToken};
