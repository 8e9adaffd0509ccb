//! Deployed applications and their request model.
//!
//! # Responsibilities
//! - Application registries and lifecycle (`application`)
//! - Handler/filter capabilities and environment records
//! - Request and response values passed through chains
//! - Error taxonomy shared by the engine
//! - Built-in components for configuration-driven deployments

pub mod application;
pub mod builtin;
pub mod environment;
pub mod error;
pub mod handler;
pub mod mime;
pub mod request;
pub mod response;

pub use application::{FilterRegistration, HandlerRegistration, LifecycleState, WebApplication};
pub use builtin::InstantiatorRegistry;
pub use error::{EngineError, InstantiationError, ServiceError, ServiceResult};
pub use handler::{ComponentConfig, ComponentSource, Filter, Handler, Instantiator};
pub use request::{DispatchType, WebRequest};
pub use response::WebResponse;
