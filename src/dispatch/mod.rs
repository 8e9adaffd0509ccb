//! Filter chains and internal re-dispatch.
//!
//! # Data Flow
//! ```text
//! front door / dispatcher
//!     → chain.rs (select filters for handler + path + dispatch type)
//!     → current.rs (publish the current request for this worker)
//!     → FilterChain::do_filter → filters in order → handler
//!
//! handler calls RequestDispatcher
//!     → forward: new view, chain rebuilt for Forward
//!     → include: new view, handler called directly
//!     → async forward: request mutated in place, handler called directly
//! ```

pub mod chain;
pub mod current;
pub mod dispatcher;

pub use chain::{select_filters, FilterChain};
pub use current::{current, CurrentRequestGuard, DispatchContext};
pub use dispatcher::RequestDispatcher;
