//! Engine - runs generation, analysis and repair tasks
//!
//! With a provider, tasks go to the model with Fabric context prepended.
//! Without one, generation and analysis fall back to templates and
//! heuristics; repair needs a model and fails cleanly.

use crate::task::{AiResult, AiTask, Priority, TaskInput};
use modsmith_core::codegen::{self, CodeGenerator, GeneratorStats};
use modsmith_core::context::{self, ContextKind, ContextManager};
use modsmith_core::prompt;
use modsmith_core::provider::{AnyProvider, CompletionRequest, LlmProvider, UsageTracker};
use modsmith_core::{Error, GenerationSettings, Result, Settings};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

/// Confidence reported for model output
const MODEL_CONFIDENCE: f64 = 0.8;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub generation: GenerationSettings,
    /// Extra attempts after the first failed provider call
    pub max_retries: u32,
    /// First retry delay, doubled on each further attempt
    pub retry_backoff: Duration,
    /// Context chars kept after compression
    pub context_limit: usize,
    pub minecraft_version: String,
    pub fabric_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            context_limit: context::DEFAULT_COMPRESS_LIMIT,
            minecraft_version: "1.20.1".to_string(),
            fabric_version: "0.92.0+1.20.1".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            generation: settings.performance.generation_settings.clone(),
            max_retries: settings.performance.provider.max_retries,
            minecraft_version: settings.main.minecraft_version.clone(),
            fabric_version: settings.main.fabric_version.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub tasks_completed: usize,
    pub total_execution_time: f64,
    pub average_execution_time: f64,
    pub success_rate: f64,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub queued_tasks: usize,
    pub has_provider: bool,
    pub provider: Option<String>,
    pub usage: UsageTracker,
    pub templates: GeneratorStats,
}

/// What a task handler hands back on success
struct Produced {
    output: String,
    confidence: f64,
    metadata: Map<String, Value>,
}

/// Pending task ordered by priority, then by arrival
struct Queued {
    priority: Priority,
    seq: u64,
    task: AiTask,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, lower seq first within a priority
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The task engine
pub struct Engine<P: LlmProvider = AnyProvider> {
    provider: Option<P>,
    config: EngineConfig,
    context: ContextManager,
    generator: CodeGenerator,
    /// Ids of tasks currently executing
    active: HashSet<String>,
    /// Finished results in completion order. Task ids are for display and
    /// may repeat, so nothing is keyed by them.
    completed: Vec<AiResult>,
    queue: BinaryHeap<Queued>,
    next_seq: u64,
    usage: UsageTracker,
    total_time: f64,
}

impl Engine<AnyProvider> {
    /// Build the configured provider (if any) and generator preferences
    pub fn from_settings(settings: &Settings, context: ContextManager) -> Result<Self> {
        let provider = AnyProvider::from_config(&settings.provider_config())?;
        let prefs = &settings.user_preferences.generation_preferences;
        let generator = CodeGenerator::new(prefs.package_name.clone(), prefs.include_comments);

        match &provider {
            Some(p) => tracing::info!(provider = p.name(), model = p.default_model(), "engine using model backend"),
            None => tracing::info!("no model backend configured, using templates"),
        }

        Ok(Self::new(provider, EngineConfig::from_settings(settings))
            .with_context(context)
            .with_generator(generator))
    }
}

impl<P: LlmProvider> Engine<P> {
    pub fn new(provider: Option<P>, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            context: ContextManager::new(),
            generator: CodeGenerator::default(),
            active: HashSet::new(),
            completed: Vec::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            usage: UsageTracker::new(),
            total_time: 0.0,
        }
    }

    pub fn with_context(mut self, context: ContextManager) -> Self {
        self.context = context;
        self
    }

    pub fn with_generator(mut self, generator: CodeGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> Option<&P> {
        self.provider.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Latest finished result carrying `task_id`
    pub fn result(&self, task_id: &str) -> Option<&AiResult> {
        self.completed.iter().rev().find(|r| r.task_id == task_id)
    }

    // ========================================================================
    // Task entry points
    // ========================================================================

    pub async fn generate_code(&mut self, request: &str, kind: ContextKind, priority: Priority) -> AiResult {
        self.execute(AiTask::generate(request, kind, priority)).await
    }

    /// Like [`generate_code`](Self::generate_code), handing raw model text to
    /// `on_text` as it arrives. The template fallback emits its code once.
    pub async fn generate_code_streaming<F>(
        &mut self,
        request: &str,
        kind: ContextKind,
        priority: Priority,
        mut on_text: F,
    ) -> AiResult
    where
        F: FnMut(&str),
    {
        self.run(AiTask::generate(request, kind, priority), Some(&mut on_text)).await
    }

    pub async fn analyze_code(&mut self, code: &str, focus: &str) -> AiResult {
        self.execute(AiTask::analyze(code, focus, Priority::Normal)).await
    }

    pub async fn fix_code(&mut self, code: &str, error: &str) -> AiResult {
        self.execute(AiTask::fix(code, error, Priority::High)).await
    }

    pub async fn execute(&mut self, task: AiTask) -> AiResult {
        self.run(task, None).await
    }

    /// Queue a task for [`run_queue`](Self::run_queue). Returns its id.
    pub fn enqueue(&mut self, task: AiTask) -> String {
        let id = task.id.clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(task_id = %id, priority = ?task.priority, "task queued");
        self.queue.push(Queued { priority: task.priority, seq, task });
        id
    }

    /// Drain the queue, highest priority first, FIFO within a priority
    pub async fn run_queue(&mut self) -> Vec<AiResult> {
        let mut results = Vec::with_capacity(self.queue.len());
        while let Some(queued) = self.queue.pop() {
            results.push(self.execute(queued.task).await);
        }
        results
    }

    pub fn stats(&self) -> EngineStats {
        let tasks_completed = self.completed.len();
        let successes = self.completed.iter().filter(|r| r.success).count();
        let ratio = |n: f64| if tasks_completed == 0 { 0.0 } else { n / tasks_completed as f64 };

        EngineStats {
            tasks_completed,
            total_execution_time: self.total_time,
            average_execution_time: ratio(self.total_time),
            success_rate: ratio(successes as f64),
            active_tasks: self.active.len(),
            completed_tasks: self.completed.len(),
            queued_tasks: self.queue.len(),
            has_provider: self.provider.is_some(),
            provider: self.provider.as_ref().map(|p| p.name().to_string()),
            usage: self.usage.clone(),
            templates: self.generator.stats(),
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn run(&mut self, task: AiTask, sink: Option<&mut dyn FnMut(&str)>) -> AiResult {
        let started = Instant::now();
        let task_type = task.task_type();
        self.active.insert(task.id.clone());
        tracing::debug!(task_id = %task.id, task_type = task_type.as_str(), priority = ?task.priority, "executing task");

        let outcome = match &task.input {
            TaskInput::Generate { request, kind } => self.generate(request, *kind, sink).await,
            TaskInput::Analyze { code, focus } => self.analyze(code, focus).await,
            TaskInput::Fix { code, error } => self.fix(code, error).await,
        };

        let execution_time = started.elapsed().as_secs_f64();
        self.active.remove(&task.id);

        let mut result = match outcome {
            Ok(produced) => AiResult {
                task_id: task.id.clone(),
                task_type,
                success: true,
                output: Some(produced.output),
                execution_time,
                confidence: produced.confidence,
                metadata: produced.metadata,
                error: None,
            },
            Err(err) => {
                tracing::error!(task_id = %task.id, error = %err, "task failed");
                let mut metadata = Map::new();
                metadata.insert("error_kind".into(), json!(err.kind().as_str()));
                AiResult {
                    task_id: task.id.clone(),
                    task_type,
                    success: false,
                    output: None,
                    execution_time,
                    confidence: 0.0,
                    metadata,
                    error: Some(err.to_string()),
                }
            }
        };
        result.metadata.insert("task_type".into(), json!(task_type.as_str()));
        result.metadata.insert("priority".into(), json!(task.priority.value()));
        result.metadata.insert("has_provider".into(), json!(self.provider.is_some()));

        self.total_time += execution_time;
        self.completed.push(result.clone());
        result
    }

    async fn generate(
        &mut self,
        request: &str,
        kind: ContextKind,
        sink: Option<&mut dyn FnMut(&str)>,
    ) -> Result<Produced> {
        if self.provider.is_none() {
            let generated = self.generator.generate(request);
            if let Some(sink) = sink {
                sink(&generated.code);
            }

            let mut metadata = Map::new();
            metadata.insert("mode".into(), json!("template"));
            metadata.insert("context_kind".into(), json!(kind.as_str()));
            metadata.insert("pattern".into(), json!(generated.pattern.as_str()));
            metadata.insert("class_name".into(), json!(generated.class_name));
            metadata.insert("suggestions".into(), json!(generated.suggestions));
            return Ok(Produced {
                output: generated.code,
                confidence: generated.quality,
                metadata,
            });
        }

        let context = context::compress(&self.context.context_for(kind, None), self.config.context_limit);
        let prompt_text = prompt::build_generation_prompt(&context, request);
        tracing::debug!(
            context_kind = kind.as_str(),
            context_chars = context.len(),
            prompt_chars = prompt_text.len(),
            "generation prompt built"
        );

        let completion = self.completion(prompt_text);
        let text = match sink {
            Some(sink) => self.infer_streaming(completion, sink, "engine::generate_code").await?,
            None => self.infer(completion, "engine::generate_code").await?,
        };

        let code = prompt::extract_generated_code(&text);
        if code.is_empty() {
            return Err(Error::inference_failed("model returned no code").with_operation("engine::generate_code"));
        }

        let mut metadata = self.model_metadata();
        metadata.insert("context_kind".into(), json!(kind.as_str()));
        Ok(Produced {
            output: code,
            confidence: MODEL_CONFIDENCE,
            metadata,
        })
    }

    async fn analyze(&mut self, code: &str, focus: &str) -> Result<Produced> {
        if self.provider.is_some() {
            let completion = self.completion(prompt::build_analysis_prompt(code, focus));
            let text = self.infer(completion, "engine::analyze_code").await?;
            if text.trim().is_empty() {
                return Err(Error::inference_failed("model returned an empty review")
                    .with_operation("engine::analyze_code"));
            }

            let mut metadata = self.model_metadata();
            metadata.insert("focus".into(), json!(focus));
            return Ok(Produced {
                output: text.trim().to_string(),
                confidence: MODEL_CONFIDENCE,
                metadata,
            });
        }

        let pattern = codegen::detect_pattern(code);
        let quality = codegen::quality_score(code);
        let suggestions = codegen::suggestions(code, pattern);

        let mut report = format!(
            "Focus: {}\nQuality score: {:.2}\nDetected pattern: {}\n",
            focus, quality, pattern
        );
        if suggestions.is_empty() {
            report.push_str("No suggestions.\n");
        } else {
            report.push_str("Suggestions:\n");
            for suggestion in &suggestions {
                report.push_str(&format!("- {}\n", suggestion));
            }
        }

        let mut metadata = Map::new();
        metadata.insert("mode".into(), json!("heuristic"));
        metadata.insert("focus".into(), json!(focus));
        metadata.insert("pattern".into(), json!(pattern.as_str()));
        metadata.insert("suggestions".into(), json!(suggestions));
        Ok(Produced {
            output: report,
            confidence: quality,
            metadata,
        })
    }

    async fn fix(&mut self, code: &str, error: &str) -> Result<Produced> {
        if self.provider.is_none() {
            return Err(Error::provider_unavailable("fixing code needs a model backend")
                .with_operation("engine::fix_code"));
        }

        let completion = self.completion(prompt::build_repair_prompt(code, error));
        let text = self.infer(completion, "engine::fix_code").await?;
        let fixed = prompt::extract_generated_code(&text);
        if fixed.is_empty() {
            return Err(Error::inference_failed("model returned no code").with_operation("engine::fix_code"));
        }

        Ok(Produced {
            output: fixed,
            confidence: MODEL_CONFIDENCE,
            metadata: self.model_metadata(),
        })
    }

    // ========================================================================
    // Provider calls
    // ========================================================================

    fn completion(&self, prompt_text: String) -> CompletionRequest {
        let system = prompt::system_prompt(&self.config.minecraft_version, &self.config.fabric_version);
        let g = &self.config.generation;
        CompletionRequest::new(prompt::messages(&system, prompt_text))
            .with_temperature(g.effective_temperature())
            .with_top_p(g.top_p)
            .with_max_tokens(g.max_new_tokens)
    }

    fn model_metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("mode".into(), json!("model"));
        if let Some(provider) = &self.provider {
            metadata.insert("provider".into(), json!(provider.name()));
            metadata.insert("model".into(), json!(provider.default_model()));
        }
        metadata
    }

    async fn infer(&mut self, request: CompletionRequest, operation: &'static str) -> Result<String> {
        let Some(provider) = self.provider.as_ref() else {
            return Err(Error::provider_unavailable("no model backend configured").with_operation(operation));
        };

        let mut attempt = 0;
        loop {
            match provider.complete(request.clone()).await {
                Ok(response) => {
                    let model = if response.model.is_empty() {
                        provider.default_model()
                    } else {
                        response.model.as_str()
                    };
                    self.usage.track(model, &response.usage);
                    return Ok(response.content.unwrap_or_default());
                }
                Err(e) => {
                    let delay = retry_delay(&self.config, e.into_error(operation), attempt)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn infer_streaming(
        &mut self,
        request: CompletionRequest,
        sink: &mut dyn FnMut(&str),
        operation: &'static str,
    ) -> Result<String> {
        let Some(provider) = self.provider.as_ref() else {
            return Err(Error::provider_unavailable("no model backend configured").with_operation(operation));
        };

        // Only opening the stream is retried; a stream that breaks midway fails the task
        let mut attempt = 0;
        let receiver = loop {
            match provider.stream(request.clone().with_streaming(true)).await {
                Ok(receiver) => break receiver,
                Err(e) => {
                    let delay = retry_delay(&self.config, e.into_error(operation), attempt)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        receiver
            .for_each_text(|text| sink(text))
            .await
            .map_err(|e| e.into_error(operation))
    }
}

/// Delay before the next attempt, or the final error when out of retries
fn retry_delay(config: &EngineConfig, err: Error, attempt: u32) -> Result<Duration> {
    let err = err.with_context("attempt", (attempt + 1).to_string());
    if !err.is_retryable() {
        return Err(err);
    }
    if attempt >= config.max_retries {
        return Err(err.persist());
    }

    let delay = err
        .context_value("retry_after")
        .and_then(|secs| secs.parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
        .unwrap_or_else(|| config.retry_backoff * 2u32.saturating_pow(attempt));

    tracing::warn!(
        attempt = attempt + 1,
        max_retries = config.max_retries,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "provider call failed, retrying"
    );
    Ok(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modsmith_core::provider::{
        CompletionResponse, FinishReason, ProviderError, StreamReceiver, Usage,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    type Reply = std::result::Result<String, ProviderError>;

    /// Replays canned replies and remembers what it was asked
    #[derive(Default)]
    struct FakeProvider {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl FakeProvider {
        fn with_replies(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }
    }

    impl LlmProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        fn default_model(&self) -> &str {
            "fake-coder"
        }

        async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Ok(text)) => Ok(CompletionResponse {
                    id: "cmpl-1".into(),
                    model: "fake-coder".into(),
                    content: Some(text),
                    finish_reason: FinishReason::Stop,
                    usage: Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
                }),
                Some(Err(e)) => Err(e),
                None => Err(ProviderError::InvalidRequest("no reply queued".into())),
            }
        }

        async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
            let response = self.complete(request).await?;
            Ok(StreamReceiver::from_text(response.content.unwrap_or_default()))
        }
    }

    fn quick_config() -> EngineConfig {
        EngineConfig {
            retry_backoff: Duration::ZERO,
            ..EngineConfig::default()
        }
    }

    fn engine_with(replies: Vec<Reply>) -> Engine<FakeProvider> {
        Engine::new(Some(FakeProvider::with_replies(replies)), quick_config())
    }

    #[tokio::test]
    async fn test_template_generation_without_provider() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        let result = engine.generate_code("create a Ruby block", ContextKind::Block, Priority::Normal).await;

        assert!(result.success);
        assert!(result.output().contains("public class RubyBlock extends Block"));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.metadata["mode"], "template");
        assert_eq!(result.metadata["pattern"], "basic_block");
        assert_eq!(result.metadata["has_provider"], false);
        assert!(engine.result(&result.task_id).is_some());
    }

    #[tokio::test]
    async fn test_model_generation_extracts_code() {
        let mut engine = engine_with(vec![Ok(
            "// GENERATED JAVA CODE\npublic class JadeBlock extends Block {}\n// END".into(),
        )]);
        let result = engine.generate_code("a jade block", ContextKind::Block, Priority::High).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output(), "public class JadeBlock extends Block {}");
        assert_eq!(result.confidence, MODEL_CONFIDENCE);
        assert_eq!(result.metadata["provider"], "fake");
        assert_eq!(result.metadata["priority"], 3);

        let provider = engine.provider().unwrap();
        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(256));
        assert!(request.messages[0].content.contains("Fabric 1.20.1"));
        let user = &request.messages[1].content;
        assert!(user.contains("// MINECRAFT CONTEXT"));
        assert!(user.contains("FabricBlockSettings"));
        assert!(user.contains("a jade block"));

        assert_eq!(engine.stats().usage.total_tokens(), 15);
    }

    #[tokio::test]
    async fn test_streaming_forwards_chunks() {
        let mut engine = engine_with(vec![Ok("```java\nclass Wand {}\n```".into())]);
        let mut streamed = String::new();
        let result = engine
            .generate_code_streaming("a wand", ContextKind::Item, Priority::Normal, |t| streamed.push_str(t))
            .await;

        assert!(result.success);
        assert_eq!(result.output(), "class Wand {}");
        assert!(streamed.contains("class Wand {}"));
    }

    #[tokio::test]
    async fn test_template_streaming_emits_once() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        let mut chunks = 0;
        let result = engine
            .generate_code_streaming("a sword", ContextKind::Item, Priority::Normal, |_| chunks += 1)
            .await;
        assert!(result.success);
        assert_eq!(chunks, 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let mut engine = engine_with(vec![
            Err(ProviderError::Network("connection reset".into())),
            Err(ProviderError::Api { status: 503, message: "busy".into() }),
            Ok("// GENERATED JAVA CODE\nclass Ok {}".into()),
        ]);
        let result = engine.generate_code("x", ContextKind::General, Priority::Normal).await;

        assert!(result.success);
        assert_eq!(engine.provider().unwrap().calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mut engine = engine_with(vec![
            Err(ProviderError::Network("down".into())),
            Err(ProviderError::Network("down".into())),
            Err(ProviderError::Network("down".into())),
            Ok("never reached".into()),
        ]);
        let result = engine.generate_code("x", ContextKind::General, Priority::Normal).await;

        assert!(!result.success);
        assert_eq!(engine.provider().unwrap().calls(), 3);
        assert_eq!(result.metadata["error_kind"], "NetworkFailed");
        assert!(result.error.as_deref().unwrap().contains("persistent"));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let mut engine = engine_with(vec![Err(ProviderError::AuthenticationFailed)]);
        let result = engine.generate_code("x", ContextKind::General, Priority::Normal).await;

        assert!(!result.success);
        assert_eq!(engine.provider().unwrap().calls(), 1);
        assert_eq!(result.metadata["error_kind"], "AuthenticationFailed");
    }

    #[tokio::test]
    async fn test_heuristic_analysis() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        let result = engine.analyze_code("public class RubyBlock extends Block {}", "quality").await;

        assert!(result.success);
        assert!(result.output().contains("Focus: quality"));
        assert!(result.output().contains("Detected pattern: basic_block"));
        assert!(result.output().contains("Javadoc"));
        assert_eq!(result.metadata["mode"], "heuristic");
    }

    #[tokio::test]
    async fn test_model_analysis() {
        let mut engine = engine_with(vec![Ok("  Missing registration.  ".into())]);
        let result = engine.analyze_code("class A {}", "registration").await;
        assert_eq!(result.output(), "Missing registration.");
    }

    #[tokio::test]
    async fn test_fix_requires_provider() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        let result = engine.fix_code("class A {", "';' expected").await;

        assert!(!result.success);
        assert_eq!(result.metadata["error_kind"], "ProviderUnavailable");
        assert_eq!(engine.stats().success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_fix_with_provider() {
        let mut engine = engine_with(vec![Ok("// GENERATED JAVA CODE\nclass A {}\n".into())]);
        let result = engine.fix_code("class A {", "reached end of file while parsing").await;

        assert!(result.success);
        assert_eq!(result.output(), "class A {}");
        let request = engine.provider().unwrap().last_request.lock().unwrap().clone().unwrap();
        assert!(request.messages[1].content.contains("reached end of file while parsing"));
    }

    #[tokio::test]
    async fn test_queue_runs_by_priority_then_fifo() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        let low = engine.enqueue(AiTask::generate("low", ContextKind::General, Priority::Low));
        let first_normal = engine.enqueue(AiTask::generate("n1", ContextKind::General, Priority::Normal));
        let critical = engine.enqueue(AiTask::analyze("class A {}", "quality", Priority::Critical));
        let second_normal = engine.enqueue(AiTask::generate("n2", ContextKind::General, Priority::Normal));
        assert_eq!(engine.stats().queued_tasks, 4);

        let order: Vec<String> = engine.run_queue().await.into_iter().map(|r| r.task_id).collect();
        assert_eq!(order, vec![critical, first_normal, second_normal, low]);
        assert_eq!(engine.stats().queued_tasks, 0);
    }

    #[tokio::test]
    async fn test_every_queued_task_is_counted() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        for i in 0..300 {
            engine.enqueue(AiTask::analyze(format!("class C{} {{}}", i), "quality", Priority::Normal));
        }

        let results = engine.run_queue().await;
        assert_eq!(results.len(), 300);

        let stats = engine.stats();
        assert_eq!(stats.tasks_completed, 300);
        assert_eq!(stats.completed_tasks, 300);
        assert_eq!(stats.success_rate, 1.0);
        assert!(results.iter().all(|r| engine.result(&r.task_id).is_some()));
    }

    #[tokio::test]
    async fn test_result_lookup_prefers_latest() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        let mut first = AiTask::analyze("class A {}", "quality", Priority::Normal);
        let mut second = AiTask::fix("class A {", "';' expected", Priority::Normal);
        first.id = "ana_1700000000_0042".into();
        second.id = first.id.clone();

        engine.execute(first).await;
        engine.execute(second).await;

        assert_eq!(engine.stats().tasks_completed, 2);
        let latest = engine.result("ana_1700000000_0042").unwrap();
        assert_eq!(latest.task_type, crate::task::TaskType::ErrorFixing);
    }

    #[tokio::test]
    async fn test_stats() {
        let mut engine: Engine<FakeProvider> = Engine::new(None, quick_config());
        engine.generate_code("a block", ContextKind::Block, Priority::Normal).await;
        engine.fix_code("class A {", "err").await;

        let stats = engine.stats();
        assert_eq!(stats.tasks_completed, 2);
        assert_eq!(stats.completed_tasks, 2);
        assert_eq!(stats.active_tasks, 0);
        assert_eq!(stats.success_rate, 0.5);
        assert!(!stats.has_provider);
        assert_eq!(stats.provider, None);
        assert_eq!(stats.templates.generated, 1);
        assert!(stats.average_execution_time <= stats.total_execution_time);
    }
}
