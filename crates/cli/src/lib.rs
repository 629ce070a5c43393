//! Front ends of APIView Copilot: the `apiview` binary and the HTTP review API.

pub mod http_api;
pub mod server_security;

pub use http_api::{router, ApiState};
pub use server_security::{AuthToken, AUTH_TOKEN_ENV};
