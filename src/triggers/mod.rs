//! External resumption and start paths.
//!
//! - Poller: resumes time-based waits when they come due
//! - Webhook: starts runs from HTTP requests and delivers event payloads

mod poller;
mod webhook;

pub use poller::WaitPoller;
pub use webhook::{WebhookRequest, WebhookRouter};
