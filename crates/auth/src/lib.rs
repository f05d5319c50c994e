//! `presenca-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer extracts the bearer token and asks
//! a [`JwtValidator`] for the authenticated user.

pub mod authorize;
pub mod claims;
pub mod validator;

pub use authorize::{authorize_self, AuthzError};
pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use validator::{Hs256JwtValidator, JwtValidator};
