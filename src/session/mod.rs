//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! handler calls request.session(response, create)
//!     → manager.rs (lookup by requested id, or create)
//!     → cookie.rs (Set-Cookie on the response)
//!     → listener.rs (created / destroyed / id-changed / attribute events)
//!
//! Background:
//!     sweeper.rs (interval) → manager.expire_idle(now)
//! ```
//!
//! # Design Decisions
//! - The manager owns sessions; requests only carry ids
//! - Timeout enforcement is driven from outside by the sweeper

pub mod cookie;
pub mod listener;
pub mod manager;
pub mod state;
pub mod sweeper;

pub use cookie::{SessionCookieConfig, TrackingMode};
pub use listener::SessionListener;
pub use manager::SessionManager;
pub use state::Session;
