//! Domain events for decoupling side effects from the request path.
//!
//! # Architecture
//!
//! ```text
//!   request path                         subscriber process(es)
//! ┌──────────────┐   publish    ┌──────┐   message   ┌──────────────────┐
//! │  CacheAside  │ ───────────► │ bus  │ ──────────► │ EventHandler (n) │
//! │  (mutation)  │  fire&forget └──────┘  per task   │ execute_with_retry│
//! └──────────────┘                                   └──────────────────┘
//! ```
//!
//! Delivery is at-most-once: the transport keeps nothing, so a message published
//! while no subscriber is connected is gone.
//!
//! # Module Structure
//!
//! - [`types`]: `DomainEvent`, `DomainEventType`, `EventPayload`
//! - [`handler`]: the `EventHandler` trait, `HandlerError`, and retry policy

pub mod handler;
pub mod types;

pub use handler::{EventHandler, HandlerError, RetryPolicy};
pub use types::{DomainEvent, DomainEventType, EventPayload};
