//! Tower layers used by the transport and by each call
//!
//! - [`UserAgentLayer`] - Adds a default User-Agent header
//! - [`CookieLayer`] - Sends and stores cookies through a [`CookieJar`](crate::CookieJar)
//!
//! The retry layer lives in [`crate::retry`].

mod cookies;
mod user_agent;

pub use cookies::{CookieLayer, CookieService};
pub use user_agent::{UserAgentLayer, UserAgentService};
