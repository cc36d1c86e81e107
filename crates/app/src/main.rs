mod commands;

use agent_host::AgentHost;
use anyhow::Result;
use clap::{Parser, Subcommand};
use services::ChatStore;
use shared::settings::AgentSettings;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::commands::{parse_candidate, Conversation};

#[derive(Parser)]
#[command(name = "chat-assist", about = "Question classification and rewriting for chat support")]
struct Cli {
    /// Settings file (JSON); defaults to the per-user config dir
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Directory holding chat_history.db
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick which flow should answer a question
    Classify {
        question: String,
        /// Candidate as `key=label`; repeat for each one
        #[arg(short, long = "candidate", required = true)]
        candidates: Vec<String>,
        /// Background text shown to the classifier
        #[arg(long)]
        context: Option<String>,
        #[command(flatten)]
        conversation: Conversation,
    },
    /// Rewrite a follow-up into a self-contained question
    Rewrite {
        question: String,
        /// Extra context; `none` disables rewriting, `expand:` asks for retrieval phrasings
        #[arg(long)]
        context: Option<String>,
        /// Store the question and its rewrite in the chat history
        #[arg(long)]
        record: bool,
        #[command(flatten)]
        conversation: Conversation,
    },
    /// Compose a question from OCR text (reads stdin when no text is given)
    OcrQuestion { text: Option<String> },
    /// Suggest follow-up questions for a stored chat
    QuestionGuide {
        #[command(flatten)]
        conversation: Conversation,
    },
    /// Print the active items of a chat
    History {
        #[command(flatten)]
        conversation: Conversation,
    },
    /// Hide one item from a chat's history
    DeleteItem {
        #[arg(long, default_value = commands::DEFAULT_APP_ID)]
        app_id: String,
        #[arg(long)]
        chat_id: String,
        data_id: String,
    },
    /// Attach feedback labels to a stored item
    Feedback {
        #[arg(long)]
        chat_id: String,
        data_id: String,
        #[arg(required = true)]
        feedbacks: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = commands::load_settings(cli.settings.as_deref())?;
    let data_dir = commands::data_dir(cli.data_dir)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    run(cli.command, &settings, data_dir, &cancel).await
}

async fn run(
    command: Commands,
    settings: &AgentSettings,
    data_dir: PathBuf,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Commands::Classify {
            question,
            candidates,
            context,
            conversation,
        } => {
            let candidates = candidates
                .iter()
                .map(|c| parse_candidate(c))
                .collect::<Result<Vec<_>>>()?;
            let store = ChatStore::open(&data_dir)?;
            let mut request = conversation.request(&store, settings, question)?;
            request.system_context = context;

            let host = AgentHost::from_settings(settings)?;
            let result = host.classify(&request, &candidates, cancel).await?;
            commands::print_json(&result)
        }
        Commands::Rewrite {
            question,
            context,
            record,
            conversation,
        } => {
            let store = ChatStore::open(&data_dir)?;
            let mut request = conversation.request(&store, settings, question.clone())?;
            request.system_context = context;

            let host = AgentHost::from_settings(settings)?;
            let result = host.rewrite(&request, cancel).await?;
            if record {
                conversation.record(&store, &question, &result.output_text)?;
            }
            commands::print_json(&result)
        }
        Commands::OcrQuestion { text } => {
            let text = match text {
                Some(text) => text,
                None => std::io::read_to_string(std::io::stdin())?,
            };
            let host = AgentHost::from_settings(settings)?;
            let result = host.generate_question(&text, cancel).await?;
            commands::print_json(&result)
        }
        Commands::QuestionGuide { conversation } => {
            let store = ChatStore::open(&data_dir)?;
            let history = conversation.history(&store, settings)?;
            let host = AgentHost::from_settings(settings)?;
            let guide = host
                .question_guide(&conversation.model, &history, cancel)
                .await?;
            commands::print_json(&serde_json::json!({
                "questions": guide.questions,
                "usage": guide.usage,
            }))
        }
        Commands::History { conversation } => {
            let store = ChatStore::open(&data_dir)?;
            let items = store.get_chat_items(
                &conversation.app_id,
                conversation.chat_id.as_deref(),
                settings.history_read_limit,
            )?;
            commands::print_json(&items)
        }
        Commands::DeleteItem {
            app_id,
            chat_id,
            data_id,
        } => {
            let store = ChatStore::open(&data_dir)?;
            if !store.delete_chat_item(&app_id, &chat_id, &data_id)? {
                tracing::warn!(%chat_id, %data_id, "no matching item");
            }
            Ok(())
        }
        Commands::Feedback {
            chat_id,
            data_id,
            feedbacks,
        } => {
            let store = ChatStore::open(&data_dir)?;
            store.add_custom_feedbacks(&chat_id, &data_id, &feedbacks)
        }
    }
}
