use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lifelike_contracts::chat::{parse_intent, STUDIO_HELP_COMMANDS};
use lifelike_contracts::config::Settings;
use lifelike_contracts::events::EventWriter;
use lifelike_contracts::{Creation, GenerationError, SourceKind};
use lifelike_engine::{
    open_session, CreationStore, Dictation, GenerationOutcome, GenerationUpdate, InputComposer,
    ManualDictation, SessionState, SessionView, UploadedFile,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "lifelike",
    version,
    about = "Turn sketches, PDFs and prompts into interactive HTML creations"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Directory holding storage.json and events.jsonl.
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[arg(long, global = true)]
    provider: Option<String>,
    #[arg(long, global = true)]
    model: Option<String>,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
}

impl GlobalArgs {
    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(home) = &self.home {
            settings.home = home.clone();
        }
        if let Some(provider) = &self.provider {
            settings.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        settings
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    History,
    Show(ShowArgs),
    Export(ExportArgs),
    Import(ImportArgs),
    Studio,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    file: Option<PathBuf>,
    /// Write the generated HTML here instead of printing a summary.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ShowArgs {
    id: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    id: String,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct ImportArgs {
    path: PathBuf,
}

const PREVIEW_FILE_NAME: &str = "preview.html";

type GenerationResult = (u64, Result<GenerationOutcome, GenerationError>);

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lifelike error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LIFELIKE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = cli.global.apply(Settings::from_env());
    let events_path = cli
        .global
        .events
        .clone()
        .unwrap_or_else(|| settings.events_path());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli.command, settings, events_path))
}

async fn dispatch(command: Command, settings: Settings, events_path: PathBuf) -> Result<i32> {
    let events = EventWriter::new(events_path, uuid::Uuid::new_v4().to_string());
    let mut session = open_session(&settings, Some(events))?;
    session.start().await;

    match command {
        Command::Generate(args) => run_generate(&mut session, args).await,
        Command::History => {
            print_history(session.history());
            Ok(0)
        }
        Command::Show(args) => run_show(&session, args),
        Command::Export(args) => run_export(&session, args),
        Command::Import(args) => run_import(&mut session, args).await,
        Command::Studio => {
            run_studio(&mut session, &settings).await?;
            Ok(0)
        }
    }
}

async fn run_generate(session: &mut SessionState, args: GenerateArgs) -> Result<i32> {
    let file = match &args.file {
        Some(path) => Some(load_upload(path).await?),
        None => None,
    };
    if args.prompt.trim().is_empty() && file.is_none() {
        bail!("nothing to generate: pass --prompt, --file or both");
    }

    match session.submit(&args.prompt, file).await {
        GenerationUpdate::Activated(creation) => {
            match &args.out {
                Some(out) => {
                    write_text(out, &creation.html)?;
                    println!("{} -> {}", creation.name, out.display());
                }
                None => println!("{}", history_row(&creation)),
            }
            Ok(0)
        }
        GenerationUpdate::NoArtifact => {
            eprintln!("The model returned no creation. Try again with a different prompt.");
            Ok(2)
        }
        GenerationUpdate::Failed { notice } => {
            eprintln!("{notice}");
            Ok(1)
        }
        GenerationUpdate::Ignored | GenerationUpdate::Discarded => Ok(1),
    }
}

fn run_show(session: &SessionState, args: ShowArgs) -> Result<i32> {
    let creation = find_creation(session, &args.id)?;
    match &args.out {
        Some(out) => {
            write_text(out, &creation.html)?;
            println!("Wrote {}", out.display());
        }
        None => println!("{}", creation.html),
    }
    Ok(0)
}

fn run_export(session: &SessionState, args: ExportArgs) -> Result<i32> {
    let creation = find_creation(session, &args.id)?;
    let path = export_creation(creation, &args.out_dir)?;
    println!("Exported {}", path.display());
    Ok(0)
}

async fn run_import(session: &mut SessionState, args: ImportArgs) -> Result<i32> {
    let raw = tokio::fs::read_to_string(&args.path)
        .await
        .with_context(|| format!("failed reading {}", args.path.display()))?;
    match session.import(&raw).await {
        Ok(creation) => {
            println!("Imported {}", history_row(&creation));
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}", err.notice());
            tracing::debug!(error = %err, path = %args.path.display(), "import failed");
            Ok(1)
        }
    }
}

async fn run_studio(session: &mut SessionState, settings: &Settings) -> Result<()> {
    let mut composer = InputComposer::new();
    let (mut dictation, mut dictation_events) = ManualDictation::new();
    let mut running: JoinSet<GenerationResult> = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let preview_path = settings.home.join(PREVIEW_FILE_NAME);
    let mut last_status = session.view().status;

    println!(
        "Lifelike studio ({} provider, {} creations). Type /help for commands.",
        session.coordinator().provider_name(),
        session.history().len()
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let intent = parse_intent(&line);
                match intent.action.as_str() {
                    "noop" => continue,
                    "help" => println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" ")),
                    "generate" => {
                        composer.set_prompt(intent.prompt.clone().unwrap_or_default());
                        start_generation(session, &mut composer, &mut running);
                    }
                    "submit" => {
                        if composer.is_empty() {
                            println!("Add a prompt or /file first.");
                        } else {
                            start_generation(session, &mut composer, &mut running);
                        }
                    }
                    "select_file" => match value_as_non_empty_string(intent.command_args.get("path")) {
                        Some(path) => match load_upload(Path::new(&path)).await {
                            Ok(file) => {
                                let label = format!("{} ({})", file.name, file.mime_type);
                                match composer.select_file(file) {
                                    Ok(()) => println!("Selected {label}"),
                                    Err(err) => println!("{err}"),
                                }
                            }
                            Err(err) => println!("{err:#}"),
                        },
                        None => println!("/file requires a path"),
                    },
                    "clear_input" => {
                        composer.clear();
                        println!("Input cleared");
                    }
                    "toggle_dictation" => {
                        if dictation.is_listening() {
                            dictation.stop();
                        } else {
                            dictation.start()?;
                        }
                        composer.drain(&mut dictation_events);
                        println!(
                            "Dictation {}",
                            if composer.is_listening() { "on" } else { "off" }
                        );
                    }
                    "dictate" => {
                        let text = intent.arg("text").unwrap_or_default();
                        if dictation.hear(text) {
                            composer.drain(&mut dictation_events);
                            println!("Prompt: {}", composer.prompt());
                        } else {
                            println!("Not listening. Use /listen first.");
                        }
                    }
                    "list_history" => print_history(session.history()),
                    "open_creation" => match intent.arg("id") {
                        Some(id) => {
                            if session.select_from_history(id) {
                                render_active(session.view(), &preview_path);
                            } else {
                                println!("No creation with id {id}");
                            }
                        }
                        None => println!("/open requires an id"),
                    },
                    "reset" => {
                        session.reset();
                        println!("Back to the start screen.");
                    }
                    "import" => match value_as_non_empty_string(intent.command_args.get("path")) {
                        Some(path) => match tokio::fs::read_to_string(&path).await {
                            Ok(raw) => {
                                if session.import(&raw).await.is_ok() {
                                    render_active(session.view(), &preview_path);
                                }
                            }
                            Err(err) => println!("Failed to read {path}: {err}"),
                        },
                        None => println!("/import requires a path"),
                    },
                    "export" => match session.active() {
                        Some(creation) => {
                            let dir = value_as_non_empty_string(intent.command_args.get("path"))
                                .map(PathBuf::from)
                                .unwrap_or_else(|| PathBuf::from("."));
                            match export_creation(creation, &dir) {
                                Ok(path) => println!("Exported {}", path.display()),
                                Err(err) => println!("Export failed: {err:#}"),
                            }
                        }
                        None => println!("Nothing to export. Open or generate a creation first."),
                    },
                    "unknown" => {
                        let command = value_as_non_empty_string(intent.command_args.get("command"))
                            .unwrap_or_default();
                        println!("Unknown command /{command}. Type /help.");
                    }
                    other => tracing::debug!(action = other, "unhandled studio action"),
                }
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                let (token, result) = joined.context("generation task failed")?;
                let update = session.finish_generation(token, result).await;
                match update {
                    GenerationUpdate::Activated(_) => render_active(session.view(), &preview_path),
                    GenerationUpdate::NoArtifact => println!("No creation came back. Try again."),
                    GenerationUpdate::Failed { .. } | GenerationUpdate::Ignored => {}
                    GenerationUpdate::Discarded => tracing::debug!(token, "late result dropped"),
                }
            }
        }

        if let Some(notice) = session.take_notice() {
            println!("! {notice}");
        }
        let status = session.view().status;
        if status != last_status {
            println!("[{}]", status.as_str());
            last_status = status;
        }
    }

    running.shutdown().await;
    Ok(())
}

fn start_generation(
    session: &mut SessionState,
    composer: &mut InputComposer,
    running: &mut JoinSet<GenerationResult>,
) {
    let Some((prompt, file)) = composer.take_submission() else {
        return;
    };
    let Some(ticket) = session.begin_generation(&prompt, file) else {
        return;
    };
    println!("Generating...");
    let coordinator = session.coordinator();
    running.spawn(async move {
        let result = coordinator
            .generate(&ticket.prompt, ticket.file.as_ref())
            .await;
        (ticket.token(), result)
    });
}

fn render_active(view: SessionView<'_>, preview_path: &Path) {
    let Some(creation) = view.active.filter(|_| view.is_focused) else {
        return;
    };
    println!("{}", history_row(creation));
    match write_text(preview_path, &creation.html) {
        Ok(()) => println!("Preview: {}", preview_path.display()),
        Err(err) => tracing::warn!(error = %err, "failed to write preview"),
    }
}

async fn load_upload(path: &Path) -> Result<UploadedFile> {
    let file = UploadedFile::from_path(path).await?;
    if !file.is_accepted() {
        bail!("Please upload an image or PDF.");
    }
    Ok(file)
}

fn find_creation<'a>(session: &'a SessionState, id: &str) -> Result<&'a Creation> {
    session
        .store()
        .get(id)
        .with_context(|| format!("no creation with id {id}"))
}

fn export_creation(creation: &Creation, out_dir: &Path) -> Result<PathBuf> {
    let exported = CreationStore::export(creation)?;
    let path = out_dir.join(&exported.file_name);
    write_text(&path, &exported.json)?;
    Ok(path)
}

fn print_history(history: &[Creation]) {
    if history.is_empty() {
        println!("No creations yet.");
        return;
    }
    for creation in history {
        println!("{}", history_row(creation));
    }
}

fn history_row(creation: &Creation) -> String {
    let kind = match creation.source_kind() {
        SourceKind::Pdf => "pdf",
        SourceKind::Image => "image",
        SourceKind::None => "text",
    };
    format!(
        "{}  {}  {:<5}  {}",
        creation.id,
        creation.timestamp.format("%Y-%m-%d %H:%M"),
        kind,
        creation.name
    )
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("failed writing {}", path.display()))
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
