//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, request URI)
//!     → router.rs (pick application: host filter, longest context path)
//!     → mapping.rs (pick handler: exact, longest prefix, extension, default)
//!     → matcher.rs (parse and match individual URL patterns)
//!     → Return: Resolution or NoSuchApplication / NoSuchResource
//! ```
//!
//! # Design Decisions
//! - Mapping tables are built before start and read without locks afterwards
//! - No regex in hot path (exact maps, sorted prefixes, extension map)
//! - Deterministic: same input always resolves to the same handler

pub mod mapping;
pub mod matcher;
pub mod router;

pub use mapping::{MappingMatch, MappingTable};
pub use matcher::{MatchKind, UrlPattern};
pub use router::{ApplicationServer, Resolution};
