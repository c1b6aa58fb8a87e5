pub mod error;
pub mod jwt;
pub mod middleware;
pub mod rate_limit;
pub mod user_store;

pub use error::{AuthError, Result};
pub use jwt::{Claims, JwtManager};
pub use middleware::{resolve_unified, AuthAuditSink, AuthEvent, AuthFailureReason, AuthMiddleware, Credential, NullAuditSink};
pub use rate_limit::{RateLimitHeaders, RateLimiter};
pub use user_store::{RefreshTokenInfo, User, UserContext, UserStore};
