//! BULWARK Response Templates
//!
//! Rule-matched blueprints that turn an error context into a standardized
//! response. Templates are selected per module, error type and severity,
//! rendered by substituting `{{dot.path}}` placeholders and optionally
//! memoized per error id.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod manager;
pub mod render;
pub mod template;

pub use cache::{CacheStats, ResponseCache};
pub use error::{TemplateError, TemplateResult};
pub use manager::{ResponseTemplateManager, TemplateManagerConfig, DEFAULT_TEMPLATE_ID};
pub use render::{data_context, render_str, render_value};
pub use template::{builtin_templates, DynamicFn, ResponseTemplate, TemplateResultBlock};
