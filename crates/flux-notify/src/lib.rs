pub mod dispatcher;
pub mod providers;
pub mod rate_limit;
pub mod template;
pub mod transport;

pub use dispatcher::{EmailLogQuery, NotificationDispatcher};
pub use providers::{LogMailer, SmtpMailer};
pub use rate_limit::{
    RateLimitDecision, RateLimitSnapshot, RateLimitTier, RateLimitUsage, RateLimiter,
    SweeperHandle,
};
pub use template::{render, EmailTemplate, NotificationKind, RenderedEmail, TemplateSet};
pub use transport::{MailTransport, OutgoingMail, SendOutcome};
