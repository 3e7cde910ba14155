//! Assistant - the command flow behind the CLI
//!
//! Generate, check the target path, ask for consent, write, remember.
//! Consent is a trait so the flow runs the same under a terminal prompt
//! and in tests.

use crate::engine::{Engine, EngineStats};
use crate::task::{AiResult, Priority};
use modsmith_core::error::io_failed;
use modsmith_core::provider::{AnyProvider, LlmProvider};
use modsmith_core::{
    ContextKind, ContextManager, Error, FileGuard, LogEntry, MemoryManager, MemoryOptions, OperationLog, Result,
    Settings, WriteOutcome,
};
use std::path::{Path, PathBuf};

/// How many log entries a consent prompt gets to show
const CONSENT_HISTORY: usize = 5;

/// Asks the user before a file is created or replaced
pub trait Consent {
    fn confirm(&mut self, action: &str, recent: &[LogEntry]) -> bool;
}

/// Says yes to everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Consent for AutoApprove {
    fn confirm(&mut self, _action: &str, _recent: &[LogEntry]) -> bool {
        true
    }
}

/// Says no to everything
#[derive(Debug, Clone, Copy, Default)]
pub struct Deny;

impl Consent for Deny {
    fn confirm(&mut self, _action: &str, _recent: &[LogEntry]) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantOptions {
    /// Ask before creating any file
    pub safe_mode: bool,
    /// Ask before replacing an existing file
    pub confirm_overwrites: bool,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            safe_mode: true,
            confirm_overwrites: true,
        }
    }
}

impl AssistantOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            safe_mode: settings.main.safe_mode,
            confirm_overwrites: settings.user_preferences.workflow.confirm_overwrites,
        }
    }

    /// No prompts at all
    pub fn unattended() -> Self {
        Self {
            safe_mode: false,
            confirm_overwrites: false,
        }
    }
}

/// What a handled command produced
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub code: String,
    pub memory_id: Option<String>,
    pub written: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub result: AiResult,
}

pub struct Assistant<C: Consent, P: LlmProvider = AnyProvider> {
    engine: Engine<P>,
    guard: FileGuard,
    memory: MemoryManager,
    log: OperationLog,
    consent: C,
    options: AssistantOptions,
}

impl<C: Consent> Assistant<C, AnyProvider> {
    /// Wire everything from loaded settings. Memory lives under
    /// `main.memory_dir`, context overrides under `main.context_dir`.
    pub fn from_settings(settings: &Settings, consent: C) -> Result<Self> {
        let context = ContextManager::with_directory(&settings.main.context_dir)?;
        let engine = Engine::from_settings(settings, context)?;
        let memory = MemoryManager::open(&settings.main.memory_dir, MemoryOptions::from_settings(settings))?;

        Ok(Self::new(
            engine,
            FileGuard::from_settings(settings),
            memory,
            consent,
            AssistantOptions::from_settings(settings),
        ))
    }
}

impl<C: Consent, P: LlmProvider> Assistant<C, P> {
    pub fn new(
        engine: Engine<P>,
        guard: FileGuard,
        memory: MemoryManager,
        consent: C,
        options: AssistantOptions,
    ) -> Self {
        Self {
            engine,
            guard,
            memory,
            log: OperationLog::new(),
            consent,
            options,
        }
    }

    pub fn with_options(mut self, options: AssistantOptions) -> Self {
        self.options = options;
        self
    }

    pub fn engine(&self) -> &Engine<P> {
        &self.engine
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager {
        &mut self.memory
    }

    pub fn guard(&self) -> &FileGuard {
        &self.guard
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn options(&self) -> AssistantOptions {
        self.options
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Generate code for `request`, optionally writing it to `output`
    pub async fn handle(&mut self, request: &str, output: Option<&Path>) -> Result<CommandOutcome> {
        self.log.record("Process started", request);
        let kind = ContextKind::detect(request);
        let result = self.engine.generate_code(request, kind, Priority::Normal).await;
        self.finish(request, output, result)
    }

    /// [`handle`](Self::handle) with model text passed to `on_text` as it arrives
    pub async fn handle_streaming<F>(
        &mut self,
        request: &str,
        output: Option<&Path>,
        on_text: F,
    ) -> Result<CommandOutcome>
    where
        F: FnMut(&str),
    {
        self.log.record("Process started", request);
        let kind = ContextKind::detect(request);
        let result = self
            .engine
            .generate_code_streaming(request, kind, Priority::Normal, on_text)
            .await;
        self.finish(request, output, result)
    }

    /// Review an existing source file
    pub async fn analyze_file(&mut self, path: &Path, focus: &str) -> Result<AiResult> {
        let code = std::fs::read_to_string(path).map_err(|e| io_failed("assistant::analyze_file", path, e))?;
        self.log.record("Analysis started", path.display().to_string());

        let result = self.engine.analyze_code(&code, focus).await;
        if !result.success {
            self.log.record("Analysis failed", result.error.clone().unwrap_or_default());
            return Err(task_error(&result));
        }
        Ok(result)
    }

    /// Repair `path` given a compiler error. The fix goes to `output`, or
    /// back over the source file when no output is given.
    pub async fn fix_file(&mut self, path: &Path, error: &str, output: Option<&Path>) -> Result<CommandOutcome> {
        let code = std::fs::read_to_string(path).map_err(|e| io_failed("assistant::fix_file", path, e))?;
        self.log.record("Fix started", format!("{}: {}", path.display(), error));

        let result = self.engine.fix_code(&code, error).await;
        let request = format!("fix {}: {}", path.display(), error);
        self.finish(&request, Some(output.unwrap_or(path)), result)
    }

    fn finish(&mut self, request: &str, output: Option<&Path>, result: AiResult) -> Result<CommandOutcome> {
        if !result.success {
            self.log.record("Generation failed", result.error.clone().unwrap_or_default());
            return Err(task_error(&result));
        }
        let code = result.output().to_string();
        self.log.record(
            "Code generated",
            format!("{} chars, confidence {:.2}", code.len(), result.confidence),
        );

        let written = match output {
            Some(path) => Some(self.save(path, &code)?),
            None => None,
        };

        let memory_id = self.memory.store_interaction(request, &code, None)?;
        if let Some(id) = &memory_id {
            self.log.record("Memory stored", id.clone());
        }

        let (written, backup) = match written {
            Some(outcome) => (Some(outcome.path), outcome.backup),
            None => (None, None),
        };
        Ok(CommandOutcome {
            code,
            memory_id,
            written,
            backup,
            result,
        })
    }

    /// Write `code` to `path` through the guard, asking consent as configured
    pub fn save(&mut self, path: &Path, code: &str) -> Result<WriteOutcome> {
        let resolved = match self.guard.validate(path) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.log.record("Security blocked", format!("{}: {}", path.display(), err.message()));
                return Err(err);
            }
        };

        if self.options.confirm_overwrites && resolved.is_file() {
            self.ask(&format!("Overwrite existing file {}", resolved.display()))?;
        }
        if self.options.safe_mode {
            self.ask(&format!("Create file {}", resolved.display()))?;
        }

        let outcome = self.guard.write(&resolved, code)?;
        self.log.record("File written", outcome.path.display().to_string());
        if let Some(backup) = &outcome.backup {
            self.log.record("Backup created", backup.display().to_string());
        }
        Ok(outcome)
    }

    fn ask(&mut self, action: &str) -> Result<()> {
        if self.consent.confirm(action, self.log.recent(CONSENT_HISTORY)) {
            self.log.record("Consent granted", action);
            Ok(())
        } else {
            self.log.record("Consent denied", action);
            Err(Error::consent_denied(action).with_operation("assistant::save"))
        }
    }
}

fn task_error(result: &AiResult) -> Error {
    let message = result.error.clone().unwrap_or_else(|| "task failed".to_string());
    Error::task_failed(result.task_id.clone(), message).with_operation("assistant::handle")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use modsmith_core::config::FileOperations;
    use modsmith_core::ErrorKind;

    /// Answers from a script and remembers every question
    #[derive(Default)]
    struct Scripted {
        answers: Vec<bool>,
        asked: Vec<String>,
        history_seen: Vec<usize>,
    }

    impl Consent for &mut Scripted {
        fn confirm(&mut self, action: &str, recent: &[LogEntry]) -> bool {
            self.asked.push(action.to_string());
            self.history_seen.push(recent.len());
            if self.answers.is_empty() {
                true
            } else {
                self.answers.remove(0)
            }
        }
    }

    fn assistant<C: Consent>(dir: &Path, consent: C, options: AssistantOptions) -> Assistant<C> {
        let engine: Engine<AnyProvider> = Engine::new(None, EngineConfig::default());
        let guard = FileGuard::new(dir, &FileOperations::default());
        Assistant::new(engine, guard, MemoryManager::in_memory(MemoryOptions::default()), consent, options)
    }

    #[tokio::test]
    async fn test_handle_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut assistant = assistant(dir.path(), Deny, AssistantOptions::default());

        let outcome = assistant.handle("create a Ruby block", None).await.unwrap();
        assert!(outcome.code.contains("public class RubyBlock extends Block"));
        assert_eq!(outcome.written, None);
        assert_eq!(outcome.memory_id.as_deref(), Some(modsmith_core::memory::memory_id("create a Ruby block").as_str()));
        assert_eq!(assistant.memory().len(), 1);

        let actions: Vec<&str> = assistant.log().entries().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["Process started", "Code generated", "Memory stored"]);
    }

    #[tokio::test]
    async fn test_handle_writes_with_consent() {
        let dir = tempfile::tempdir().unwrap();
        let mut scripted = Scripted::default();
        let target = Path::new("src/main/java/com/example/RubyBlock.java");

        {
            let mut assistant = assistant(dir.path(), &mut scripted, AssistantOptions::default());
            let outcome = assistant.handle("create a Ruby block", Some(target)).await.unwrap();
            assert_eq!(outcome.written, Some(dir.path().join(target)));
            assert_eq!(outcome.backup, None);
            assert!(dir.path().join(target).is_file());

            // second run replaces the file: overwrite then create are both asked
            let outcome = assistant.handle("create a Ruby block", Some(target)).await.unwrap();
            assert!(outcome.backup.is_some());
        }

        assert_eq!(scripted.asked.len(), 3);
        assert!(scripted.asked[0].starts_with("Create file"));
        assert!(scripted.asked[1].starts_with("Overwrite existing file"));
        assert!(scripted.asked[2].starts_with("Create file"));
        assert!(scripted.history_seen.iter().all(|&n| n > 0 && n <= CONSENT_HISTORY));
    }

    #[tokio::test]
    async fn test_denied_consent_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut assistant = assistant(dir.path(), Deny, AssistantOptions::default());

        let err = assistant
            .handle("a sapphire item", Some(Path::new("generated/SapphireItem.java")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsentDenied);
        assert!(!dir.path().join("generated/SapphireItem.java").exists());
        assert!(assistant.memory().is_empty());
        assert_eq!(assistant.log().entries().last().unwrap().action, "Consent denied");
    }

    #[tokio::test]
    async fn test_unattended_skips_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let mut assistant = assistant(dir.path(), Deny, AssistantOptions::unattended());

        let outcome = assistant
            .handle("a sapphire item", Some(Path::new("generated/SapphireItem.java")))
            .await
            .unwrap();
        assert!(outcome.written.unwrap().is_file());
    }

    #[tokio::test]
    async fn test_blocked_path_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut assistant = assistant(dir.path(), AutoApprove, AssistantOptions::default());

        let err = assistant
            .handle("a block", Some(Path::new(".git/hooks/Evil.java")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathNotAllowed);
        assert!(assistant.log().entries().iter().any(|e| e.action == "Security blocked"));
    }

    #[tokio::test]
    async fn test_fix_without_provider_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("generated/Broken.java");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, "class Broken {").unwrap();

        let mut assistant = assistant(dir.path(), AutoApprove, AssistantOptions::default());
        let err = assistant.fix_file(&source, "reached end of file", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskFailed);
        assert!(err.message().contains("ProviderUnavailable"));
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "class Broken {");
    }

    #[tokio::test]
    async fn test_analyze_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Gem.java");
        std::fs::write(&source, "/** Gem */\npublic class GemItem extends Item {}").unwrap();

        let mut assistant = assistant(dir.path(), AutoApprove, AssistantOptions::default());
        let result = assistant.analyze_file(&source, "registration").await.unwrap();
        assert!(result.output().contains("Focus: registration"));
        assert!(result.output().contains("register your item"));

        let missing = assistant.analyze_file(&dir.path().join("Nope.java"), "quality").await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::FileNotFound);
    }
}
