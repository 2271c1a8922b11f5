//! Proactive token refresh.
//!
//! # Data Flow
//! ```text
//! generate_token(session, request)
//!     → issuer (bounded by request_timeout)
//!     → store token + schedule refresh at expires_at - margin
//!
//! scheduled refresh fires
//!     → in-flight check (one refresh per session)
//!     → issuer, retrying with exponential backoff
//!     → success: replace token, schedule next refresh
//!     → failure: TokenEvent::RefreshFailed, last token kept
//! ```
//!
//! # Design Decisions
//! - Every stored token carries an epoch; a scheduled refresh whose epoch
//!   no longer matches the session is a no-op
//! - Background failures surface as events, never as errors to callers
//! - Authentication failures end the retry chain unless configured otherwise

pub mod manager;
pub mod types;

pub use manager::TokenManager;
pub use types::{IssuedToken, Token, TokenError, TokenEvent, TokenIssuer, TokenRequest, TokenResult, TokenStats};
