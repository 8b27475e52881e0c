use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use compass_agents::{GovernanceAgent, GovernanceSettings};
use compass_core::{
    organize_override, ChatInput, ContentGuard, Intent, IntentClassifier, Lexicon,
    TemplateRegistry,
};
use compass_llm::Backend;
use compass_observability::{init_tracing, GovernanceMetrics};
use compass_storage::Store;

#[derive(Debug, Parser)]
#[command(name = "compass")]
#[command(about = "Directive response governance for decide/plan/organize requests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session against the configured generator.
    Chat {
        #[arg(long, default_value = "cli")]
        user: String,
    },
    /// Show the intent, scores and deciding rule for a message.
    Classify {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Run candidate text through the content guard.
    Enforce {
        #[arg(long)]
        intent: String,
        /// Read the candidate from a file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the system prompt sent for an intent.
    Template { intent: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("compass_cli");
    let cli = Cli::parse();

    match cli.command {
        Command::Chat { user } => {
            let agent = build_agent().await?;
            run_chat(agent, user).await?;
        }
        Command::Classify { text } => {
            let text = text.join(" ");
            let classification = IntentClassifier::standard().explain(&text);
            let payload = serde_json::json!({
                "classification": classification,
                "organize_override": organize_override(&text),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Enforce { intent, file, json } => {
            let intent = Intent::from_str(&intent).context("invalid --intent value")?;
            let raw = match file {
                Some(path) => fs::read_to_string(&path)
                    .with_context(|| format!("failed reading {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    io::stdin()
                        .read_to_string(&mut buffer)
                        .context("failed reading stdin")?;
                    buffer
                }
            };

            let guard = ContentGuard::new(
                Arc::new(Lexicon::standard()),
                Arc::new(TemplateRegistry::standard()),
                GovernanceSettings::from_env().limits,
            );
            let enforced = guard.enforce_detailed(&raw, intent);

            if json {
                let payload = serde_json::json!({
                    "intent": intent,
                    "content": enforced.content,
                    "outcome": enforced.outcome,
                    "lexicon_hit": enforced.lexicon_hit,
                    "failures": enforced.failures,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("{}", enforced.content);
            }
        }
        Command::Template { intent } => {
            let intent = Intent::from_str(&intent).context("invalid intent")?;
            println!("{}", TemplateRegistry::standard().system_prompt_for(intent));
        }
    }

    Ok(())
}

async fn run_chat(agent: GovernanceAgent<Backend, Store>, user: String) -> Result<()> {
    println!("Compass chat mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        let reply = agent
            .respond(ChatInput {
                text: message.to_string(),
                user_id: Some(user.clone()),
            })
            .await;

        println!("\n[{}]\n{}\n", reply.intent, reply.content);
    }

    Ok(())
}

async fn build_agent() -> Result<GovernanceAgent<Backend, Store>> {
    let generator = Backend::from_env().context("failed to initialise generation backend")?;
    let store = if let Ok(database_url) = env::var("COMPASS_DATABASE_URL") {
        Store::sqlite(&database_url).await?
    } else {
        Store::memory()
    };

    Ok(GovernanceAgent::new(
        Arc::new(generator),
        Arc::new(store),
        GovernanceMetrics::shared(),
        GovernanceSettings::from_env(),
    ))
}
