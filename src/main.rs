//! line-voice-tutor: bilingual LINE conversation partner with voice replies.

mod config;
mod error;
mod history;
mod line;
mod openai;
mod orchestrator;
mod persona;
mod platform;
mod reply;
mod storage;
mod supabase;
mod text;
mod transcribe;
mod voice;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Config, HistoryBackend};
use history::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore, SupabaseHistoryStore};
use orchestrator::{Services, TurnOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "line-voice-tutor", about = "Bilingual LINE chat bot with voice replies")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persona to run as (overrides config)
    #[arg(short, long)]
    persona: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,rusqlite=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("line-voice-tutor starting");

    let mut config = Config::load(args.config.as_deref());
    config.apply_env();
    if let Some(persona) = args.persona {
        config.persona = persona;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let persona = config.resolve_persona()?;
    info!(
        "Persona: {} (voice: {}, history table: {})",
        persona.name, persona.voice.voice, persona.history_table
    );

    let openai = Arc::new(openai::OpenAiClient::new(config.openai.clone())?);
    let supabase = supabase::SupabaseClient::new(&config.supabase)?;
    let line = Arc::new(line::client::LineClient::new(&config.line)?);

    let history: Arc<dyn HistoryStore> = match config.history.backend {
        HistoryBackend::Sqlite => {
            let path = config.history.resolved_sqlite_path();
            info!("History: SQLite at {}", path.display());
            Arc::new(SqliteHistoryStore::open(&path, &persona.history_table)?)
        }
        HistoryBackend::Supabase => {
            info!("History: Supabase table {}", persona.history_table);
            Arc::new(SupabaseHistoryStore::new(supabase.clone(), &persona.history_table))
        }
        HistoryBackend::Memory => {
            info!("History: in-memory (lost on restart)");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    let objects = Arc::new(storage::SupabaseStorage::new(supabase, &config.supabase.audio_bucket));

    let orchestrator = TurnOrchestrator::new(
        persona,
        &config.pipeline,
        Services {
            chat: openai.clone(),
            speech: openai.clone(),
            transcriber: openai,
            objects,
            history,
            platform: line,
        },
    );

    let state = line::webhook::WebhookState {
        orchestrator: Arc::new(orchestrator),
        channel_secret: Arc::from(config.line.channel_secret.as_str()),
    };
    let app = line::webhook::router(state, &config.server.webhook_path);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Webhook path: {}", config.server.webhook_path);

    line::webhook::serve(app, &addr).await?;

    Ok(())
}
