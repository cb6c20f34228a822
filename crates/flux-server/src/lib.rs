pub mod app;
pub mod logging;

pub use app::{build_transport, AlertingApp, RateLimitStatus};
pub use logging::init_logging;
