pub mod rate_limit;
pub mod request_log;

pub use rate_limit::{RateLimiter, rate_limit_middleware};
pub use request_log::{REQUEST_ID_HEADER, request_log};
