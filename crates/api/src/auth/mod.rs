//! Authentication: session JWTs and the request middleware

mod jwt;
mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{auth_middleware, AuthUser};
