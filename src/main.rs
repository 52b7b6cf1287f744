use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};
use serde_json::Value as JsonValue;

use hive::core::config::Config;
use hive::core::error::EngineError;
use hive::database::DatabaseManager;
use hive::executor::LlmStepExecutor;
use hive::providers::{OllamaProvider, PlatformClient};
use hive::runner::TelosRunner;
use hive::scheduler::SwarmScheduler;
use hive::telos::instance::{InstanceStore, TelosSource, TelosState};
use hive::telos::observation::ObservationSink;
use hive::telos::registry::AgentRegistry;
use hive::telos::template::{TelosTemplate, TemplateStore};

#[derive(Parser)]
#[command(name = "hive", about = "Swarm coordinator for autonomous agent missions", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine and run missions until interrupted
    Run {
        /// Override the configured concurrency bound
        #[arg(long)]
        max_concurrency: Option<usize>,
    },

    /// Manage mission templates
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },

    /// Assign a mission to an agent
    Assign {
        agent: String,

        /// Name of an existing template
        #[arg(long, conflicts_with = "custom")]
        template: Option<String>,

        /// Inline mission text, one step per line
        #[arg(long)]
        custom: Option<String>,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long)]
        persona: Option<String>,
    },

    /// Assign a template to every known agent that does not have it yet
    AssignAll {
        #[arg(long)]
        template: String,
    },

    /// List agent profiles
    Agents,

    /// List telos instances and their progress
    Instances {
        /// Only show instances in this state (idle, active, completed, failed)
        #[arg(long)]
        state: Option<String>,
    },

    /// Show the full step history of one instance
    Inspect { agent: String, mission: String },

    /// Re-arm a terminal or stuck instance so it resumes from its current step
    Reset { agent: String, mission: String },

    /// Remove an agent's profile and all of its instances
    Remove { agent: String },

    /// Show an agent's recent observations
    Observations {
        agent: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Create a new template
    Create {
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// A step payload; repeat for each step. JSON objects are parsed,
        /// anything else becomes a free-text decision prompt.
        #[arg(long = "step")]
        steps: Vec<String>,

        /// JSON file containing an array of step payloads
        #[arg(long, conflicts_with = "steps")]
        steps_file: Option<PathBuf>,
    },

    /// List templates
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    let db = DatabaseManager::new(&config)
        .await
        .context("Failed to initialize storage")?;

    let templates = Arc::new(TemplateStore::new(db.templates()));
    let registry = Arc::new(AgentRegistry::new(db.profiles()));
    let instances = Arc::new(InstanceStore::new(db.instances()));
    let observations = Arc::new(ObservationSink::new(db.observations()));

    match cli.command {
        Command::Run { max_concurrency } => {
            let mut engine = config.engine.clone();
            if let Some(n) = max_concurrency {
                engine.max_concurrency = n;
            }

            let ollama = OllamaProvider::from_config(&config.llm)
                .map_err(|e| anyhow!("LLM provider setup failed: {}", e))?;
            if !ollama.wait_until_ready().await {
                return Err(anyhow!(
                    "LLM backend at {} did not become ready",
                    config.llm.api_base
                ));
            }
            let platform = PlatformClient::from_config(&config.platform)
                .map_err(|e| anyhow!("Platform client setup failed: {}", e))?;

            let executor = Arc::new(LlmStepExecutor::new(Arc::new(ollama), Arc::new(platform)));

            let owner = format!("hive-{}", uuid::Uuid::new_v4());
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

            let runner = Arc::new(TelosRunner::new(
                instances.clone(),
                templates.clone(),
                registry.clone(),
                observations.clone(),
                executor,
                &owner,
                &engine,
                shutdown_rx.clone(),
            ));
            let scheduler = SwarmScheduler::new(instances, runner, &engine, shutdown_rx);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, shutting down gracefully");
                    let _ = shutdown_tx.send(true);
                }
            });

            scheduler.run().await;
        }

        Command::Template { command } => match command {
            TemplateCommand::Create {
                name,
                description,
                steps,
                steps_file,
            } => {
                let payloads = if let Some(path) = steps_file {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read steps file {:?}", path))?;
                    let parsed: Vec<JsonValue> = serde_json::from_str(&text)
                        .with_context(|| format!("Steps file {:?} is not a JSON array", path))?;
                    parsed
                } else if !steps.is_empty() {
                    steps.iter().map(|s| parse_step(s)).collect()
                } else {
                    return Err(anyhow!("Provide at least one --step or a --steps-file"));
                };

                let count = payloads.len();
                let template = TelosTemplate::new(&name, &description, payloads);
                templates
                    .put(template)
                    .await
                    .with_context(|| format!("Failed to store template '{}'", name))?;
                println!("Created template '{}' with {} step(s)", name, count);
            }
            TemplateCommand::List => {
                let all = templates.list().await.context("Failed to list templates")?;
                if all.is_empty() {
                    println!("No templates");
                }
                for record in all {
                    let t = record.entity;
                    println!("{}  ({} steps)  {}", t.name, t.step_count(), t.description);
                }
            }
        },

        Command::Assign {
            agent,
            template,
            custom,
            display_name,
            persona,
        } => {
            registry
                .get_or_create(&agent, display_name.as_deref(), persona.as_deref())
                .await
                .context("Failed to create agent profile")?;

            let source = match (template, custom) {
                (Some(name), None) => {
                    let t = templates
                        .get(&name)
                        .await
                        .with_context(|| format!("Template '{}' not found", name))?;
                    TelosSource::Template {
                        name,
                        step_count: t.step_count(),
                    }
                }
                (None, Some(text)) => {
                    let steps: Vec<String> = text
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect();
                    if steps.is_empty() {
                        return Err(anyhow!("Custom mission text contains no steps"));
                    }
                    TelosSource::Custom { steps }
                }
                _ => return Err(anyhow!("Provide exactly one of --template or --custom")),
            };

            let instance = instances
                .assign(&agent, source)
                .await
                .context("Assignment failed")?;
            println!(
                "Assigned '{}' to {} ({} steps)",
                instance.source.mission_name(),
                agent,
                instance.source.step_count()
            );
        }

        Command::AssignAll { template } => {
            let t = templates
                .get(&template)
                .await
                .with_context(|| format!("Template '{}' not found", template))?;

            let mut assigned = 0;
            for profile in registry.list().await.context("Failed to list agents")? {
                let source = TelosSource::Template {
                    name: template.clone(),
                    step_count: t.step_count(),
                };
                match instances.assign(&profile.agent_id, source).await {
                    Ok(_) => assigned += 1,
                    Err(EngineError::DuplicateInstance(_)) => {}
                    Err(e) => warn!("Could not assign to {}: {}", profile.agent_id, e),
                }
            }
            println!("Assigned '{}' to {} agent(s)", template, assigned);
        }

        Command::Agents => {
            let profiles = registry.list().await.context("Failed to list agents")?;
            if profiles.is_empty() {
                println!("No agents");
            }
            for p in profiles {
                println!(
                    "{}  persona={}  sessions={}  last_active={}",
                    p.agent_id,
                    p.persona,
                    p.total_sessions,
                    p.last_active_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Command::Instances { state } => {
            let filter = state
                .as_deref()
                .map(str::parse::<TelosState>)
                .transpose()
                .map_err(|e| anyhow!("{}", e))?;

            let mut all: Vec<_> = instances
                .list()
                .await
                .context("Failed to list instances")?
                .into_iter()
                .map(|r| r.entity)
                .filter(|i| filter.map(|s| i.state == s).unwrap_or(true))
                .collect();
            all.sort_by_key(|i| i.scheduling_key());

            if all.is_empty() {
                println!("No instances");
            }
            for i in all {
                let lease = match &i.lease {
                    Some(l) => format!("  lease={} until {}", l.owner, l.expires_at.format("%H:%M:%S")),
                    None => String::new(),
                };
                println!(
                    "{}  {}  step {}/{}{}",
                    i.id,
                    i.state,
                    i.current_step,
                    i.source.step_count(),
                    lease
                );
            }
        }

        Command::Inspect { agent, mission } => {
            let record = instances
                .get(&format!("{}::{}", agent, mission))
                .await
                .context("Instance not found")?;
            println!("{}", serde_json::to_string_pretty(&record.entity)?);
        }

        Command::Reset { agent, mission } => {
            let id = format!("{}::{}", agent, mission);
            let instance = instances.reset(&id).await.context("Reset failed")?;
            println!(
                "Reset {}: now {} at step {}",
                id, instance.state, instance.current_step
            );
        }

        Command::Remove { agent } => {
            let removed = instances
                .remove_for_agent(&agent)
                .await
                .context("Failed to remove instances")?;
            match registry.remove(&agent).await {
                Ok(()) => {}
                Err(EngineError::AgentNotFound(_)) => {}
                Err(e) => return Err(anyhow!("Failed to remove profile: {}", e)),
            }
            println!("Removed agent {} and {} instance(s)", agent, removed);
        }

        Command::Observations { agent, limit } => {
            let recent = observations
                .recent(&agent, limit)
                .await
                .context("Failed to fetch observations")?;
            if recent.is_empty() {
                println!("No observations for {}", agent);
            }
            for obs in recent {
                let emotion = obs
                    .emotion
                    .as_deref()
                    .map(|e| format!(" (felt: {})", e))
                    .unwrap_or_default();
                println!(
                    "[{}] {}: {}{}",
                    obs.created_at.format("%Y-%m-%d %H:%M:%S"),
                    obs.action_type,
                    obs.summary,
                    emotion
                );
            }
        }
    }

    Ok(())
}

/// Steps given on the command line: JSON payloads are used as-is, anything
/// that is not valid JSON becomes a free-text decision prompt.
fn parse_step(raw: &str) -> JsonValue {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(v @ JsonValue::Object(_)) => v,
        _ => JsonValue::String(raw.to_string()),
    }
}
