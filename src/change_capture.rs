//! Change data capture.
//!
//! Committed mutations are fanned out to subscribers through bounded per-subscription queues.
//! Subscribers only observe mutations committed after their registration, always in commit
//! order.

pub mod broker;
pub mod filter;
pub mod subscription;
pub mod types;

pub use broker::{ChangeCaptureBroker, PublishReport};
pub use filter::ChangeCaptureFilter;
pub use subscription::ChangeCaptureStream;
pub use types::{
    CaptureContent, ChangeCaptureEvent, ClassifierType, Mutation, Operation, SubscriptionEnd,
    SubscriptionInfo,
};
