//! Bearer token validation primitives shared by the token-auth service.
//!
//! A [`TokenRegistry`] maps opaque token strings to identity records. The
//! [`Validator`] loads the registry from a [`RegistrySource`], resolves a
//! token with exact-match lookup and checks the record's expiry date against
//! an injected [`Clock`].

pub mod clock;
pub mod registry;
mod validator;

pub use clock::{Clock, FixedClock, SystemClock};
pub use registry::{
    CachedRegistry, FileRegistrySource, IdentityRecord, RegistryError, RegistrySource,
    StaticRegistrySource, TokenRegistry,
};
pub use validator::{
    check, parse_expiry, ConfigurationError, Identity, RejectReason, ValidationError, Validator,
    EXPIRY_FORMAT,
};
