//! BULWARK Runtime
//!
//! Routing, execution and orchestration. The gateway accepts errors from
//! modules, classifies and queues them, routes each one to the module's
//! handler or the template-backed default, and runs the policy engine over
//! the result. [`ErrorHandlingCenter`] wires every component together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod center;
pub mod executor;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod router;

pub use center::{
    CenterConfig, ErrorHandlingCenter, DEFAULT_ISOLATION_POLICY, DEFAULT_NOTIFICATION_POLICY,
    DEFAULT_RETRY_POLICY,
};
pub use executor::ResponseExecutor;
pub use gateway::{ErrorInterfaceGateway, GatewayBuilder, GatewayMetrics, GatewayStatus, PendingResponse};
pub use handlers::TemplateResponseHandler;
pub use logging::{init_json_tracing, init_tracing};
pub use router::{ResponseRouterEngine, RouterStatus};
