//! Security subsystem: JWT handler, permission checker, session
//! manager, and the shared per-client rate limiter.

mod jwt;
mod permissions;
mod rate_limit;
mod session;

use std::sync::Arc;

pub use jwt::{Claims, JwtHandler};
pub use permissions::{method_catalog, PermissionChecker, Role};
pub use rate_limit::{RateLimiter, RateState};
pub use session::{Session, SessionManager};

/// The security bundle owned by `AppState`: JWT issuance/validation,
/// permission table, session table, and the shared per-client rate
/// limiter.
pub struct SecuritySubsystem {
    pub jwt: JwtHandler,
    pub permissions: PermissionChecker,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: RateLimiter,
}
