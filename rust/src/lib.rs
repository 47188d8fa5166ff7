//! Run-once resolution of the secrets a web service needs before anything
//! else starts: the secret key base, the authentication secret key, and the
//! field-encryption policy with its keys. Everything is read from environment
//! variables, validated, and then frozen for the life of the process.

pub mod bootstrap;
pub mod cipher;
pub mod encryption;
pub mod env;
pub mod error;
pub mod keys;
pub mod logging;
pub mod mode;
pub mod secret;
pub mod secrets;
pub mod tokens;

pub use bootstrap::{install, resolved, Bootstrap, ResolvedSecrets};
pub use error::BootstrapError;
