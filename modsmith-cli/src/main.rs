//! # modsmith CLI
//!
//! Command-line interface for the Fabric mod code assistant.
//!
//! Usage:
//!   modsmith <request>
//!   modsmith generate <request> -o <file>
//!   modsmith analyze <file>
//!   modsmith fix <file> --error <message>
//!   modsmith interactive
//!
//! Examples:
//!   modsmith "create a sapphire ore block"
//!   modsmith generate "a ruby sword" -o src/main/java/com/example/RubySword.java
//!   modsmith fix src/main/java/com/example/RubyBlock.java --error "';' expected"
//!   modsmith config set performance provider.kind '"ollama"'

mod logging;

use clap::{Parser, Subcommand};
use modsmith_agent::{Assistant, AssistantOptions, CommandOutcome, Consent};
use modsmith_core::config::DEFAULT_CONFIG_DIR;
use modsmith_core::{ConfigManager, ConfigSection, Error, ErrorKind, LogEntry, Result};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const PREVIEW_CHARS: usize = 1000;
const DEFAULT_SAVE_PATH: &str = "src/main/java/com/example/Generated.java";

#[derive(Parser)]
#[command(name = "modsmith")]
#[command(author, version, about = "modsmith - Fabric mod code assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Request to generate code for (interactive mode when empty)
    #[arg(trailing_var_arg = true)]
    request: Vec<String>,

    /// Configuration directory
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Write files without asking for consent (this run only)
    #[arg(long = "unsafe", global = true)]
    unattended: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate code for a request
    Generate {
        #[arg(required = true)]
        request: Vec<String>,

        /// Write the code to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print model output as it arrives
        #[arg(long)]
        stream: bool,
    },
    /// Review an existing Java source file
    Analyze {
        file: PathBuf,

        #[arg(long, default_value = "quality")]
        focus: String,
    },
    /// Repair a Java source file given a compiler error
    Fix {
        file: PathBuf,

        /// The compiler or runtime error message
        #[arg(short, long)]
        error: String,

        /// Write the fix here instead of over the source file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Read requests from stdin until `exit`
    Interactive,
    /// Inspect or edit configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect stored interactions
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every section with overrides applied
    Show,
    /// Print one value by dot path
    Get { section: String, key: String },
    /// Set a value by dot path. VALUE is JSON; anything else is stored as a string.
    Set { section: String, key: String, value: String },
    /// Check every section
    Validate,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Most recent interactions first
    List {
        #[arg(short, default_value = "10")]
        n: usize,
    },
    Show { id: String },
    /// Attach feedback to an interaction
    Feedback {
        id: String,
        #[arg(required = true)]
        text: Vec<String>,
    },
    Clear,
}

/// Asks on stderr, reads the answer from stdin. Anything but y/yes is a no.
struct TerminalConsent;

impl Consent for TerminalConsent {
    fn confirm(&mut self, action: &str, recent: &[LogEntry]) -> bool {
        if !recent.is_empty() {
            eprintln!("Recent operations:");
            for entry in recent {
                eprintln!("  {} {}: {}", entry.timestamp.format("%H:%M:%S"), entry.action, entry.details);
            }
        }
        let answer = ask(&format!("{}? [y/N] ", action)).unwrap_or_default().to_lowercase();
        matches!(answer.as_str(), "y" | "yes")
    }
}

/// Print a question on stderr and read one trimmed line
fn ask(question: &str) -> Option<String> {
    eprint!("{}", question);
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

fn preview(code: &str) -> String {
    if code.chars().count() <= PREVIEW_CHARS {
        return code.to_string();
    }
    let cut: String = code.chars().take(PREVIEW_CHARS).collect();
    format!("{}\n... (truncated)", cut)
}

fn print_outcome(outcome: &CommandOutcome, quiet: bool) {
    match &outcome.written {
        Some(path) => {
            if !quiet {
                println!("{}", preview(&outcome.code));
            }
            eprintln!("Wrote {}", path.display());
            if let Some(backup) = &outcome.backup {
                eprintln!("Backup at {}", backup.display());
            }
        }
        // Nothing written: the code itself is the output
        None => println!("{}", outcome.code),
    }
    if !quiet {
        eprintln!(
            "confidence {:.2}, {:.2}s{}",
            outcome.result.confidence,
            outcome.result.execution_time,
            outcome
                .memory_id
                .as_ref()
                .map(|id| format!(", memory {}", id))
                .unwrap_or_default()
        );
    }
}

fn open_assistant(config: &ConfigManager, unattended: bool) -> Result<Assistant<TerminalConsent>> {
    let settings = config.settings()?;
    let assistant = Assistant::from_settings(&settings, TerminalConsent)?;
    Ok(if unattended {
        assistant.with_options(AssistantOptions::unattended())
    } else {
        assistant
    })
}

async fn generate(
    config: &ConfigManager,
    request: &str,
    output: Option<&Path>,
    stream: bool,
    cli: &Cli,
) -> Result<()> {
    let mut assistant = open_assistant(config, cli.unattended)?;
    if stream {
        let mut stdout = std::io::stdout();
        let outcome = assistant
            .handle_streaming(request, output, |text| {
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            })
            .await?;
        println!();
        if let Some(path) = &outcome.written {
            eprintln!("Wrote {}", path.display());
        }
        return Ok(());
    }

    let outcome = assistant.handle(request, output).await?;
    print_outcome(&outcome, cli.quiet);
    Ok(())
}

async fn interactive(config: &ConfigManager, cli: &Cli) -> Result<()> {
    let mut assistant = open_assistant(config, cli.unattended)?;
    println!("modsmith interactive mode. Type `help` for commands.");

    loop {
        let Some(line) = read_request() else {
            break;
        };
        match line.as_str() {
            "" => continue,
            "exit" | "quit" | "q" => break,
            "help" => {
                println!("Commands:");
                println!("  help              show this help");
                println!("  stats             engine and memory statistics");
                println!("  exit | quit | q   leave");
                println!("Anything else is a code request, e.g. `create a sapphire ore block`.");
            }
            "stats" => {
                let stats = serde_json::to_string_pretty(&assistant.stats()).unwrap_or_default();
                println!("{}", stats);
                println!("memory entries: {}", assistant.memory().len());
            }
            request => match assistant.handle(request, None).await {
                Ok(outcome) => {
                    println!("{}", preview(&outcome.code));
                    let Some(answer) = ask(&format!("Save to file? Path [{}], or n to skip: ", DEFAULT_SAVE_PATH))
                    else {
                        continue;
                    };
                    let lower = answer.to_lowercase();
                    if lower == "n" || lower == "no" {
                        continue;
                    }
                    let path = if lower.is_empty() || lower == "y" || lower == "yes" {
                        PathBuf::from(DEFAULT_SAVE_PATH)
                    } else {
                        PathBuf::from(answer)
                    };
                    match assistant.save(&path, &outcome.code) {
                        Ok(written) => println!("Wrote {}", written.path.display()),
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            },
        }
    }
    Ok(())
}

/// Prompt for one request line. None on end of input.
fn read_request() -> Option<String> {
    print!("modsmith> ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

async fn analyze(config: &ConfigManager, file: &Path, focus: &str, cli: &Cli) -> Result<()> {
    let mut assistant = open_assistant(config, cli.unattended)?;
    let result = assistant.analyze_file(file, focus).await?;
    println!("{}", result.output());
    if !cli.quiet {
        eprintln!("confidence {:.2}", result.confidence);
    }
    Ok(())
}

async fn fix(config: &ConfigManager, file: &Path, error: &str, output: Option<&Path>, cli: &Cli) -> Result<()> {
    let mut assistant = open_assistant(config, cli.unattended)?;
    let outcome = assistant.fix_file(file, error, output).await?;
    print_outcome(&outcome, cli.quiet);
    Ok(())
}

fn parse_section(name: &str) -> Result<ConfigSection> {
    name.parse()
}

fn config_command(config: &mut ConfigManager, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut all = serde_json::Map::new();
            for section in ConfigSection::ALL {
                let mut value = config.effective(section);
                mask_secrets(&mut value);
                all.insert(section.as_str().to_string(), value);
            }
            println!("{}", serde_json::to_string_pretty(&Value::Object(all)).unwrap_or_default());
            let summary = config.summary();
            if !summary.env_overrides.is_empty() {
                eprintln!("environment overrides: {}", summary.env_overrides.join(", "));
            }
        }
        ConfigAction::Get { section, key } => {
            let section = parse_section(section)?;
            let mut value: Value = config.get(section, key).ok_or_else(|| {
                Error::new(ErrorKind::ConfigNotFound, format!("no value at {}", key))
                    .with_operation("cli::config_get")
                    .with_context("section", section.as_str())
            })?;
            if key.ends_with("api_key") && !value.is_null() {
                value = Value::String("***".into());
            }
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        }
        ConfigAction::Set { section, key, value } => {
            let section = parse_section(section)?;
            let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.clone()));
            config.set(section, key, value, false)?;
            // Only persist values the section still accepts
            if let Some(Err(e)) = config.validate().remove(&section) {
                return Err(e);
            }
            config.save(section)?;
            println!("{}.{} updated", section, key);
        }
        ConfigAction::Validate => {
            let mut failed = 0;
            for (section, result) in config.validate() {
                match result {
                    Ok(()) => println!("{:<18} ok", section.as_str()),
                    Err(e) => {
                        failed += 1;
                        println!("{:<18} {}", section.as_str(), e.message());
                    }
                }
            }
            if failed > 0 {
                return Err(Error::config_invalid(format!("{} section(s) failed validation", failed))
                    .with_operation("cli::config_validate"));
            }
        }
    }
    Ok(())
}

fn mask_secrets(value: &mut Value) {
    if let Some(key) = value.pointer_mut("/provider/api_key") {
        if !key.is_null() {
            *key = Value::String("***".into());
        }
    }
}

fn memory_command(config: &ConfigManager, action: &MemoryAction) -> Result<()> {
    let settings = config.settings()?;
    let mut memory = modsmith_core::MemoryManager::open(
        &settings.main.memory_dir,
        modsmith_core::MemoryOptions::from_settings(&settings),
    )?;

    match action {
        MemoryAction::List { n } => {
            let records = memory.recent(*n);
            if records.is_empty() {
                println!("(no interactions stored)");
            }
            for record in records {
                let input: String = record.input.chars().take(60).collect();
                let feedback = if record.feedback.is_some() { " *" } else { "" };
                println!(
                    "{}  {}  {}{}",
                    record.id,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    input,
                    feedback
                );
            }
        }
        MemoryAction::Show { id } => {
            let record = memory
                .get(id)
                .ok_or_else(|| Error::storage_not_found(id.clone()).with_operation("cli::memory_show"))?;
            println!("{}", serde_json::to_string_pretty(&record).unwrap_or_default());
        }
        MemoryAction::Feedback { id, text } => {
            memory.record_feedback(id, &text.join(" "))?;
            println!("feedback recorded for {}", id);
        }
        MemoryAction::Clear => {
            memory.clear()?;
            println!("memory cleared");
        }
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let mut config = ConfigManager::load(&cli.config_dir)?;
    tracing::debug!(dir = %cli.config_dir.display(), "configuration loaded");

    match &cli.command {
        Some(Commands::Generate { request, output, stream }) => {
            generate(&config, &request.join(" "), output.as_deref(), *stream, cli).await
        }
        Some(Commands::Analyze { file, focus }) => analyze(&config, file, focus, cli).await,
        Some(Commands::Fix { file, error, output }) => fix(&config, file, error, output.as_deref(), cli).await,
        Some(Commands::Interactive) => interactive(&config, cli).await,
        Some(Commands::Config { action }) => config_command(&mut config, action),
        Some(Commands::Memory { action }) => memory_command(&config, action),
        None if cli.request.is_empty() => interactive(&config, cli).await,
        None => generate(&config, &cli.request.join(" "), None, false, cli).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_cli_logger(cli.verbose, cli.quiet);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bare_request_parses() {
        let cli = Cli::try_parse_from(["modsmith", "create", "a", "ruby", "block"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.request.join(" "), "create a ruby block");
        assert_eq!(cli.config_dir, PathBuf::from(DEFAULT_CONFIG_DIR));
    }

    #[test]
    fn test_subcommand_flags() {
        let cli = Cli::try_parse_from([
            "modsmith", "--unsafe", "fix", "Ruby.java", "--error", "';' expected", "-o", "generated/Ruby.java",
        ])
        .unwrap();
        assert!(cli.unattended);
        match cli.command {
            Some(Commands::Fix { file, error, output }) => {
                assert_eq!(file, PathBuf::from("Ruby.java"));
                assert_eq!(error, "';' expected");
                assert_eq!(output, Some(PathBuf::from("generated/Ruby.java")));
            }
            _ => panic!("expected fix"),
        }
    }

    #[test]
    fn test_generate_output_after_request() {
        let cli = Cli::try_parse_from(["modsmith", "generate", "a", "ruby", "sword", "-o", "generated/RubySword.java"])
            .unwrap();
        match cli.command {
            Some(Commands::Generate { request, output, stream }) => {
                assert_eq!(request.join(" "), "a ruby sword");
                assert_eq!(output, Some(PathBuf::from("generated/RubySword.java")));
                assert!(!stream);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(PREVIEW_CHARS + 5);
        let shown = preview(&long);
        assert!(shown.ends_with("\n... (truncated)"));
        assert_eq!(shown.chars().filter(|c| *c == 'x').count(), PREVIEW_CHARS);
    }

    #[test]
    fn test_mask_secrets() {
        let mut value = serde_json::json!({ "provider": { "api_key": "sk-123", "kind": "openai" } });
        mask_secrets(&mut value);
        assert_eq!(value["provider"]["api_key"], "***");
        assert_eq!(value["provider"]["kind"], "openai");
    }
}
