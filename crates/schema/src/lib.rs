//! Payload contracts for trigger input and output.
//!
//! Validation is two-phase and both phases must pass:
//!
//! 1. structural validation of the raw payload against a JSON-Schema subset;
//! 2. projection down to the declared fields only, so undeclared (possibly
//!    sensitive) attributes never reach an external destination.

pub mod projection;
pub mod schema;
pub mod validator;

pub use projection::{Projection, Projector, TypedProjection};
pub use schema::{JsonSchema, SchemaError};
pub use validator::{METRIC_NAME, SchemaValidator, TriggerSchema, ValidatedPayload};
