//! BULWARK Core Types
//!
//! Shared vocabulary for the error center: contexts reported by modules,
//! classifications, responses and actions, conditions, handler traits,
//! clocks and the message-bus surface. No component logic lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod classification;
pub mod condition;
pub mod context;
pub mod error;
pub mod handler;
pub mod id;
pub mod response;
pub mod time;

// Re-exports
pub use bus::{BusEnvelope, BusMessage, ChannelBus, MessageBus, NoopBus};
pub use classification::{
    ErrorClassification, ErrorSource, ErrorType, Impact, Recoverability, Severity,
};
pub use condition::{Condition, ConditionOperator};
pub use context::{ErrorContext, ErrorInfo, ModuleSource, ResponseCallback};
pub use error::{CoreError, CoreResult};
pub use handler::{FnHandler, ModuleRegistration, ResponseHandler, SharedHandler};
pub use id::IdPrefix;
pub use response::{
    Action, ActionStatus, ActionType, Annotation, ErrorResponse, ResponseData, ResponseResult,
    ResponseStatus,
};
pub use time::{Clock, ManualClock, Millis, SharedClock, SystemClock};
