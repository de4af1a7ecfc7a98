pub mod cors;
pub mod identity;
pub mod rate_limit;

pub use cors::create_cors;
pub use identity::{IdentityMiddleware, USER_ID_HEADER};
pub use rate_limit::rate_limit;
