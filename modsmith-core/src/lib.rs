//! # modsmith-core
//!
//! Building blocks for an assistant that writes Fabric mod code.
//!
//! ## Modules
//! - **config**: five-section JSON configuration with typed views
//! - **provider**: chat-completion backends (OpenAI-compatible, Anthropic)
//! - **context**: Fabric API reference snippets per kind of mod element
//! - **prompt**: prompt layout and extraction of code from completions
//! - **codegen**: template fallback when no backend is configured
//! - **memory**: hashed interaction records on top of **storage**, which
//!   keeps them in memory or as one JSON file each
//! - **files**: guarded writes into approved source directories
//! - **oplog**: in-process log of user-visible actions

pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod memory;
pub mod oplog;
pub mod prompt;
pub mod provider;
pub mod storage;

pub use codegen::{CodeGenerator, CodePattern, GenerationResult};
pub use config::{ConfigManager, ConfigSection, GenerationSettings, ProviderSettings, Settings};
pub use context::{ContextKind, ContextManager};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use files::{FileGuard, WriteOutcome};
pub use memory::{InteractionRecord, MemoryManager, MemoryOptions};
pub use oplog::{LogEntry, OperationLog};
pub use provider::{
    AnthropicProvider, AnyProvider, ChatMessage, CompletionRequest, CompletionResponse, FinishReason,
    LlmProvider, OpenAIProvider, ProviderConfig, ProviderError, ProviderKind, Role, StreamChunk,
    StreamReceiver, Usage, UsageTracker,
};
pub use storage::{InMemoryRecords, JsonRecordDir, RecordStore};
