use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_chat_core::{
    ingest_folder_best_effort, load_pdfs_best_effort, new_conversation_id, probe_strategy, Answer,
    ChatError, ChatOptions, GeminiGenerator, HistoryStore, IngestionReport, JsonlHistoryStore,
    RetrievalResult, Session, Uuid,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// API key for the hosted language model
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Generation model identifier
    #[arg(long, env = "PDF_CHAT_MODEL", default_value = "gemini-2.0-flash")]
    model: String,

    /// Sentence-embedding model used when neural embeddings are available
    #[arg(long, env = "PDF_CHAT_EMBEDDING_MODEL", default_value = "all-minilm-l6-v2")]
    embedding_model: String,

    /// Number of chunks handed to the model per question
    #[arg(long, env = "PDF_CHAT_TOP_K", default_value = "4")]
    top_k: usize,

    /// Chunk window in characters
    #[arg(long, env = "PDF_CHAT_CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "PDF_CHAT_CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    /// Sampling temperature for generation
    #[arg(long, default_value = "0.3")]
    temperature: f32,

    /// Wall-clock limit for one generation request, in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Append question/answer turns to this JSON lines file
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Args)]
struct Sources {
    /// PDF file to index (repeatable)
    #[arg(long = "pdf")]
    pdfs: Vec<PathBuf>,

    /// Folder searched recursively for PDFs
    #[arg(long)]
    folder: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Index the PDFs and answer one question.
    Ask {
        #[command(flatten)]
        sources: Sources,
        /// Question to answer
        #[arg(long)]
        question: String,
    },
    /// Show the chunks that would ground an answer, without calling the model.
    Search {
        #[command(flatten)]
        sources: Sources,
        /// Question to search for
        #[arg(long)]
        question: String,
        /// Number of chunks to return (defaults to --top-k)
        #[arg(long)]
        k: Option<usize>,
    },
    /// Ask questions read line by line from stdin. `:clear` starts a new
    /// conversation, `:quit` exits.
    Chat {
        #[command(flatten)]
        sources: Sources,
    },
    /// Browse or prune the conversations stored in the --history file.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// One line per conversation: id, turn count, first question.
    List,
    /// Every question and answer of one conversation.
    Show { id: Uuid },
    /// Remove one conversation from the file.
    Delete { id: Uuid },
}

impl Cli {
    fn options(&self) -> ChatOptions {
        ChatOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
            embedding_model: self.embedding_model.clone(),
            generation_model: self.model.clone(),
            api_key: self
                .api_key
                .clone()
                .or_else(|| std::env::var("GOOGLE_API_KEY").ok()),
            temperature: self.temperature,
            request_timeout: Duration::from_secs(self.timeout_secs),
            ..ChatOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let options = cli.options();
    options.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat boot"
    );

    let history = match &cli.history {
        Some(path) => Some(JsonlHistoryStore::open(path)?),
        None => None,
    };

    match &cli.command {
        Command::Ask { sources, question } => {
            let generator = GeminiGenerator::new(&options)?;
            let session = index_session(&options, sources)?;
            let conversation = new_conversation_id();
            let store = history.as_ref().map(|store| (store as &dyn HistoryStore, conversation));

            let answer = session.ask(&generator, question, store).await?;
            print_answer(&session, &answer);
        }
        Command::Search {
            sources,
            question,
            k,
        } => {
            let session = index_session(&options, sources)?;
            let result = session.retrieve(question, *k)?;
            if result.is_empty() {
                println!("no matching chunks");
            }
            print_citations(&session, &result, true);
        }
        Command::Chat { sources } => {
            let generator = GeminiGenerator::new(&options)?;
            let session = index_session(&options, sources)?;
            chat_loop(&session, &generator, history.as_ref()).await?;
        }
        Command::History { action } => {
            let Some(store) = &history else {
                anyhow::bail!("pass --history <file> to choose the history file");
            };
            run_history(store, action, &mut std::io::stdout().lock())?;
        }
    }

    Ok(())
}

fn load_sources(sources: &Sources) -> anyhow::Result<IngestionReport> {
    if sources.pdfs.is_empty() && sources.folder.is_none() {
        anyhow::bail!("no PDFs given; pass --pdf <file> or --folder <dir>");
    }

    let mut report = load_pdfs_best_effort(&sources.pdfs);
    if let Some(folder) = &sources.folder {
        let found = ingest_folder_best_effort(folder)?;
        report.documents.extend(found.documents);
        report.skipped_files.extend(found.skipped_files);
    }

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }
    Ok(report)
}

fn index_session(options: &ChatOptions, sources: &Sources) -> anyhow::Result<Session> {
    let report = load_sources(sources)?;

    let selection = probe_strategy(options);
    if let Some(reason) = &selection.fallback_reason {
        eprintln!("note: neural embeddings unavailable ({reason}); using TF-IDF retrieval");
    }

    let mut session = Session::new(options.clone(), selection)?;
    let chunk_count = session.add_documents(report.documents)?;
    info!(
        documents = session.document_count(),
        chunk_count,
        strategy = %session.describe_strategy(),
        "documents indexed"
    );
    println!(
        "{} chunks ready from {} document(s)",
        chunk_count,
        session.document_count()
    );
    Ok(session)
}

async fn chat_loop(
    session: &Session,
    generator: &GeminiGenerator,
    history: Option<&JsonlHistoryStore>,
) -> anyhow::Result<()> {
    let mut conversation = new_conversation_id();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        match question {
            "" => continue,
            ":quit" | ":q" => break,
            ":clear" => {
                conversation = new_conversation_id();
                println!("started conversation {conversation}");
                continue;
            }
            _ => {}
        }

        let store = history.map(|store| (store as &dyn HistoryStore, conversation));
        match session.ask(generator, question, store).await {
            Ok(answer) => print_answer(session, &answer),
            Err(error) if error.is_user_error() => println!("{error}"),
            Err(error @ ChatError::Generation { .. }) => {
                println!("{error}\nplease try again");
            }
            Err(error) => return Err(error.into()),
        }
    }

    Ok(())
}

fn print_answer(session: &Session, answer: &Answer) {
    println!("{}", answer.text.trim());
    if !answer.grounding.is_empty() {
        println!("\nsources:");
        print_citations(session, &answer.grounding, false);
    }
}

fn print_citations(session: &Session, result: &RetrievalResult, include_text: bool) {
    for (position, hit) in result.hits.iter().enumerate() {
        let filename = session
            .document(&hit.chunk.document_id)
            .map(|document| document.filename.as_str())
            .unwrap_or("unknown");
        println!(
            "[{}] score={:.4} file={} chunk={} chars={}..{}",
            position + 1,
            hit.score,
            filename,
            hit.chunk.chunk_index,
            hit.chunk.char_start,
            hit.chunk.char_end
        );
        if include_text {
            println!("  {}", hit.chunk.text);
        }
    }
}

fn run_history(
    store: &dyn HistoryStore,
    action: &HistoryAction,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        HistoryAction::List => {
            let ids = store.conversations()?;
            if ids.is_empty() {
                writeln!(out, "no saved conversations")?;
            }
            for id in ids {
                let turns = store.conversation(id)?;
                let first = turns.first().map_or("", |turn| turn.question.as_str());
                writeln!(out, "{id}  {} turn(s)  {first}", turns.len())?;
            }
        }
        HistoryAction::Show { id } => {
            let turns = store.conversation(*id)?;
            if turns.is_empty() {
                anyhow::bail!("no conversation {id}");
            }
            for turn in turns {
                writeln!(out, "[{}] Q: {}", turn.asked_at.to_rfc3339(), turn.question)?;
                writeln!(out, "A: {}\n", turn.answer.trim())?;
            }
        }
        HistoryAction::Delete { id } => {
            let removed = store.delete(*id)?;
            if removed == 0 {
                anyhow::bail!("no conversation {id}");
            }
            info!(conversation = %id, turns = removed, "conversation deleted");
            writeln!(out, "deleted {removed} turn(s) of {id}")?;
        }
    }
    Ok(())
}
