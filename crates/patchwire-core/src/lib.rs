//! Core of the patchwire server: turns natural-language prompts into
//! validated, property-level patches for live UI component instances and
//! fans them out to every observer of a session.
//!
//! ```text
//! prompt + snapshot
//!     |
//!     v
//! manifest::reconcile --> selector::Selector --> orchestrator (ground)
//!                                                     |
//!                               retry::RetryValidator <-> validator::validate
//!                                                     |
//!                                                     v
//!                                   broadcast::Broadcaster::publish(patch)
//! ```

pub mod backend;
pub mod broadcast;
pub mod manifest;
pub mod orchestrator;
pub mod retry;
pub mod selector;
pub mod session;
pub mod turns;
pub mod validator;

pub use broadcast::{BroadcastEvent, Broadcaster};
pub use manifest::{ComponentManifest, ManifestRegistry, MountedInstance, Patch, PropMap};
pub use orchestrator::{OrchestrationResult, Orchestrator, PromptRequest, Target};
pub use session::SessionRegistry;
pub use validator::ValidationReport;
