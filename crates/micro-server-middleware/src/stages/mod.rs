//! Middleware stages applied by [`compose`](crate::compose).
//!
//! 1. [`cors`] - Answer preflights, add allow headers
//! 2. [`method_override`] - Turn `POST` into the verb the client asked for

pub mod cors;
pub mod method_override;

pub use cors::{AllowedOrigins, CorsBuilder, CorsConfig, CorsMiddleware};
pub use method_override::{MethodOverrideMiddleware, OriginalMethod};
