//! Invocations: one dispatch attempt of a trigger to a subscription.
//!
//! Holds the in-flight [`Invocation`] record, the observable
//! [`InvocationStatus`], the events published along an invocation's life and
//! the pure invoke step ([`InvocationEngine`]). Stores, delivery and the
//! services that tie them together live in `ets-infra`.

pub mod engine;
pub mod events;
pub mod invocation;
pub mod status;

pub use engine::{InvocationEngine, InvokeOptions, Invoked, NO_OUTPUT_ERROR};
pub use events::{
    EtsEvent, EtsEventEnvelope, InvocationCompleted, InvocationFailed, TRIGGER_ACK_TOPIC,
    TRIGGER_TOPIC, TriggerInvoked, TriggerWorkflow, WORKFLOW_TOPIC,
};
pub use invocation::{Invocation, InvocationType};
pub use status::{
    CompleteInvocationInput, FAILURE_TTL, InvocationStatus, SUCCESS_TTL, StartInvocationInput,
};
