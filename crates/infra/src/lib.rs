//! Infrastructure for the event trigger service: storage, the trigger
//! service itself, delivery, background workers and configuration.

pub mod config;
pub mod delivery;
pub mod event_bus;
pub mod jobs;
pub mod publisher;
pub mod service;
pub mod status;
pub mod store;
pub mod workers;


pub use config::{EtsConfig, load_dotenv};
pub use publisher::EventPublisher;
pub use service::TriggerService;
pub use status::InvocationStatusTracker;
