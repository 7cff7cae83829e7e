//! # Event Construction
//!
//! Typed government-reporting event payloads and their XML rendering.
//!
//! This crate provides:
//! - The closed [`EventType`](types::EventType) enumeration with per-type
//!   schema namespaces and root elements
//! - [`EventPayload`](payload::EventPayload), a tagged union of typed
//!   payloads (one variant per submittable event type)
//! - A structured XML document builder with centralized escaping
//! - [`EventBuilder`](builder::EventBuilder), which validates logical
//!   fields, stamps environment metadata and renders the final payload

pub mod builder;
pub mod payload;
pub mod types;
pub mod xml;

pub use builder::{BuiltEvent, EventBuildError, EventBuilder, Environment, OrgContext};
pub use payload::EventPayload;
pub use types::EventType;
pub use xml::{XmlDocument, XmlElement};
