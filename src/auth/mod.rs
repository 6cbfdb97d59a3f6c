//! Signature authentication and management key provisioning.
//!
//! A request flows through [`ParsedRequest`] parsing, account verification
//! ([`account_check`]) and management key reconciliation ([`key_check`]);
//! the [`Authenticator`] composes them into a [`Session`].

pub mod account_check;
pub mod key_check;
pub mod keypair;
pub mod middleware;
pub mod request;
pub mod session;

pub use keypair::KeyPair;
pub use middleware::auth_middleware;
pub use request::ParsedRequest;
pub use session::{AuthPolicy, Authenticator, Session};
