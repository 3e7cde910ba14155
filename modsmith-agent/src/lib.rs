//! # modsmith Agent
//!
//! The agent turns a request into a file on disk:
//! 1. The request is classified (block, item, entity, ...)
//! 2. The engine asks the model, primed with matching Fabric context
//! 3. Code is cut out of the completion (or a template is filled in)
//! 4. The assistant checks the target path and asks before writing
//! 5. The interaction is remembered
//!
//! Analysis and repair of existing sources go through the same engine.

mod assistant;
mod engine;
mod task;

pub use assistant::{Assistant, AssistantOptions, AutoApprove, CommandOutcome, Consent, Deny};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use task::{AiResult, AiTask, Priority, TaskInput, TaskType};
