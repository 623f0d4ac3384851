//! # siri-hub
//!
//! `siri-hub` is a multi-tenant exchange hub for real-time transit data
//! spoken over the SIRI family of services. Each tenant (a
//! [`Referential`][referential::Referential]) owns an in-memory transit
//! model, a registry of remote partners, a collection dispatcher pulling
//! data in, and a broadcaster engine pushing changes out, translating
//! identifiers between partner namespaces on both paths.
//!
//! ## Internal architecture map
//!
//! - `referential`: tenant assembly and lifecycle
//! - `model`: entity stores, transactional view, updater, CSV loader
//! - `partner`: partner runtime, settings, subscriptions, registry
//! - `connector`: per-operation collectors and broadcasters
//! - `collect`: partner election and update fan-out
//! - `broadcast`: model-event pump feeding subscription broadcasters
//! - `guardian`: liveness probing and model refresh loops
//! - `transport` / `audit`: seams to the SOAP layer and the audit backend
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events. Library code emits
//! events/spans and does not unconditionally initialize a global
//! subscriber; binaries and tests own that at process boundaries.

pub mod audit;
pub mod broadcast;
pub mod clock;
pub mod collect;
pub mod connector;
pub mod error;
pub mod guardian;
pub mod identifier;
pub mod model;
pub mod observability;
pub mod partner;
pub mod referential;
pub mod transport;

pub use clock::{Clock, FakeClock, SystemClock};
pub use identifier::{IdentifierGenerator, ObjectId};
pub use referential::{Referential, ReferentialRegistry, ReferentialServices, ReferentialSlug};
