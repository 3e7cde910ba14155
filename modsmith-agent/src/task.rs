//! Task and result types shared by the engine and the assistant

use chrono::{DateTime, Local};
use modsmith_core::ContextKind;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    CodeAnalysis,
    ErrorFixing,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "code_generation",
            TaskType::CodeAnalysis => "code_analysis",
            TaskType::ErrorFixing => "error_fixing",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "gen",
            TaskType::CodeAnalysis => "ana",
            TaskType::ErrorFixing => "fix",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskInput {
    Generate { request: String, kind: ContextKind },
    Analyze { code: String, focus: String },
    Fix { code: String, error: String },
}

impl TaskInput {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskInput::Generate { .. } => TaskType::CodeGeneration,
            TaskInput::Analyze { .. } => TaskType::CodeAnalysis,
            TaskInput::Fix { .. } => TaskType::ErrorFixing,
        }
    }

    fn primary_text(&self) -> &str {
        match self {
            TaskInput::Generate { request, .. } => request,
            TaskInput::Analyze { code, .. } | TaskInput::Fix { code, .. } => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiTask {
    pub id: String,
    pub priority: Priority,
    pub input: TaskInput,
    pub created_at: DateTime<Local>,
}

impl AiTask {
    pub fn new(input: TaskInput, priority: Priority) -> Self {
        let created_at = Local::now();
        Self {
            id: task_id(input.task_type(), input.primary_text(), created_at.timestamp()),
            priority,
            input,
            created_at,
        }
    }

    pub fn generate(request: impl Into<String>, kind: ContextKind, priority: Priority) -> Self {
        Self::new(TaskInput::Generate { request: request.into(), kind }, priority)
    }

    pub fn analyze(code: impl Into<String>, focus: impl Into<String>, priority: Priority) -> Self {
        Self::new(TaskInput::Analyze { code: code.into(), focus: focus.into() }, priority)
    }

    pub fn fix(code: impl Into<String>, error: impl Into<String>, priority: Priority) -> Self {
        Self::new(TaskInput::Fix { code: code.into(), error: error.into() }, priority)
    }

    pub fn task_type(&self) -> TaskType {
        self.input.task_type()
    }
}

/// `<gen|ana|fix>_<unix secs>_<4 digits>`
///
/// The digits hash the input together with a process-wide counter so two
/// identical requests in the same second still get distinct ids.
fn task_id(task_type: TaskType, input: &str, secs: i64) -> String {
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    TASK_SEQ.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    format!("{}_{}_{:04}", task_type.id_prefix(), secs, hasher.finish() % 10_000)
}

/// Outcome of one task. Failures are results too.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiResult {
    pub task_id: String,
    pub task_type: TaskType,
    pub success: bool,
    pub output: Option<String>,
    /// Seconds
    pub execution_time: f64,
    pub confidence: f64,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
}

impl AiResult {
    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or_default()
    }
}
