use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use classify::cache::{Resource, ResourceFamily};
use classify::error::user_message;
use classify::families::imports::{ImapParams, ImapRequest};
use classify::{
    logging, ActionKind, CacheSnapshot, ClassifySession, ClientConfig, Collection,
    ConnectionStatus, Export, Import, Outcome, ResourceCache, SessionNotice,
};

#[derive(Parser)]
#[command(name = "classify")]
#[command(about = "Terminal client for Classify collection servers", version)]
#[command(after_help = "Server and socket URLs come from the config file, then from
CLASSIFY_SERVER_URL / CLASSIFY_SOCKET_URL / CLASSIFY_RECONNECT_MS / CLASSIFY_LOG.")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow connection status and pushed events
    Watch {
        /// Collection to select while watching
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Manage the imports of a collection
    Imports {
        #[arg(short, long)]
        collection: String,

        #[command(subcommand)]
        action: ImportCommand,
    },

    /// Manage the exports of a collection
    Exports {
        #[arg(short, long)]
        collection: String,

        #[command(subcommand)]
        action: ExportCommand,
    },

    /// Browse the items of a collection
    Items {
        #[arg(short, long)]
        collection: String,

        #[command(subcommand)]
        action: ItemCommand,
    },

    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionCommand,
    },
}

#[derive(Subcommand)]
enum ImportCommand {
    List,

    /// Import a local directory
    AddDir {
        name: String,
        path: String,

        #[arg(short, long)]
        recursive: bool,
    },

    /// Import an IMAP mailbox. Without --mailbox the server lists the mailboxes.
    AddImap {
        name: String,
        host: String,

        #[arg(long, default_value = "993")]
        port: u16,

        #[arg(long)]
        login: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        mailbox: Option<String>,

        /// Only mails with attachments
        #[arg(long)]
        only_attached: bool,

        /// Fetch every mail instead of searching
        #[arg(long)]
        all: bool,
    },

    Delete { name: String },
    Start { name: String },
    Stop { name: String },
}

#[derive(Subcommand)]
enum ExportCommand {
    List,

    /// Export into a local directory
    AddDir {
        path: String,

        #[arg(short, long)]
        recursive: bool,
    },

    Delete { name: String },
    Force { name: String },
    Stop { name: String },
}

#[derive(Subcommand)]
enum ItemCommand {
    List,
    Delete { name: String },
}

#[derive(Subcommand)]
enum CollectionCommand {
    List,

    Create {
        name: String,

        #[arg(short, long, default_value = "movies")]
        kind: String,
    },

    Delete { name: String },

    /// Show what the server can classify
    References,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match user_message(&e) {
            Some(shown) => eprintln!("{}", shown.display().red()),
            None => eprintln!("{} {:#}", "error:".red().bold(), e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ClientConfig::load(cli.config.as_deref())?;
    let _guard = logging::init(&config.log)?;
    let session = ClassifySession::new(&config)?;

    match cli.command {
        Commands::Watch { collection } => watch(&session, collection).await?,

        Commands::Imports { collection, action } => {
            let scope = session.select_collection(&collection);
            let cache = scope.imports.as_ref();
            match action {
                ImportCommand::List => print_snapshot(&cache.list().await?),
                ImportCommand::AddDir {
                    name,
                    path,
                    recursive,
                } => {
                    cache.list().await?;
                    let outcome = cache.add(Import::directory(name, path, recursive)).await?;
                    print_outcome(outcome, "Import added");
                }
                ImportCommand::AddImap {
                    name,
                    host,
                    port,
                    login,
                    password,
                    mailbox,
                    only_attached,
                    all,
                } => {
                    let params = ImapParams {
                        host,
                        port,
                        login,
                        password,
                        request: if all { ImapRequest::All } else { ImapRequest::Search },
                        mailbox: mailbox.unwrap_or_default(),
                        only_attached,
                        search: None,
                    };
                    cache.list().await?;
                    let outcome = cache.add(Import::imap(name, params)).await?;
                    print_outcome(outcome, "Import added");
                }
                ImportCommand::Delete { name } => {
                    let import = find(cache, &name).await?;
                    print_outcome(cache.delete(&import).await?, "Import deleted");
                }
                ImportCommand::Start { name } => {
                    let import = find(cache, &name).await?;
                    print_outcome(cache.action(ActionKind::Start, &import).await?, "Import started");
                }
                ImportCommand::Stop { name } => {
                    let import = find(cache, &name).await?;
                    print_outcome(cache.action(ActionKind::Stop, &import).await?, "Import stopped");
                }
            }
        }

        Commands::Exports { collection, action } => {
            let scope = session.select_collection(&collection);
            let cache = scope.exports.as_ref();
            match action {
                ExportCommand::List => print_snapshot(&cache.list().await?),
                ExportCommand::AddDir { path, recursive } => {
                    cache.list().await?;
                    let outcome = cache.add(Export::directory(path, recursive)).await?;
                    print_outcome(outcome, "Export added");
                }
                ExportCommand::Delete { name } => {
                    let export = find(cache, &name).await?;
                    print_outcome(cache.delete(&export).await?, "Export deleted");
                }
                ExportCommand::Force { name } => {
                    let export = find(cache, &name).await?;
                    print_outcome(cache.action(ActionKind::Force, &export).await?, "Export forced");
                }
                ExportCommand::Stop { name } => {
                    let export = find(cache, &name).await?;
                    print_outcome(cache.action(ActionKind::Stop, &export).await?, "Export stopped");
                }
            }
        }

        Commands::Items { collection, action } => {
            let scope = session.select_collection(&collection);
            let cache = scope.items.as_ref();
            match action {
                ItemCommand::List => print_snapshot(&cache.list().await?),
                ItemCommand::Delete { name } => {
                    let item = find(cache, &name).await?;
                    print_outcome(cache.delete(&item).await?, "Item deleted");
                }
            }
        }

        Commands::Collections { action } => {
            let collections = session.collections();
            match action {
                CollectionCommand::List => {
                    let list = collections.list().await?;
                    if list.is_empty() {
                        println!("{}", "No collections".yellow());
                    }
                    for collection in list {
                        println!("  {} ({})", collection.name.bright_white(), collection.kind);
                    }
                }
                CollectionCommand::Create { name, kind } => {
                    collections.create(Collection::new(name, kind)).await?;
                    println!("{} Collection created", "✓".green());
                }
                CollectionCommand::Delete { name } => {
                    session.delete_collection(&name).await?;
                    println!("{} Collection deleted", "✓".green());
                }
                CollectionCommand::References => {
                    let references = collections.references().await?;
                    println!("{}", serde_json::to_string_pretty(&references)?);
                }
            }
        }
    }

    Ok(())
}

async fn watch(session: &ClassifySession, collection: Option<String>) -> Result<()> {
    let mut status = session.connection().watch_status();
    let mut notices = session.notices();
    let mut events = session.dispatcher().subscribe("cli", "")?;

    println!(
        "{}",
        format!("📡 Watching {}...", session.connection().url())
            .cyan()
            .bold()
    );
    session.start()?;
    if let Some(collection) = collection {
        session.select_collection(&collection);
    }

    loop {
        tokio::select! {
            Ok(status) = status.recv() => {
                let label = match status {
                    ConnectionStatus::Open => status.to_string().green(),
                    ConnectionStatus::Error | ConnectionStatus::Closed => status.to_string().red(),
                    _ => status.to_string().yellow(),
                };
                println!("{} {}", "●".bright_black(), label);
            }
            Ok(notice) = notices.recv() => match notice {
                SessionNotice::ServerRestarted => {
                    println!("{}", "↻ Server restarted, caches reloaded".yellow());
                }
                SessionNotice::CollectionSelected(Some(name)) => {
                    println!("{} {}", "Collection:".cyan(), name.bright_white());
                }
                SessionNotice::CollectionSelected(None) => println!("{}", "No collection".cyan()),
                SessionNotice::ListChanged(family) => println!("{} {}", "Δ".cyan(), family),
            },
            Some(event) = events.recv() => {
                println!("{} {}", event.topic.bright_white(), event.payload);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown();
    Ok(())
}

/// Make sure the cache is loaded and look a resource up by name
async fn find<F: ResourceFamily>(cache: &ResourceCache<F>, name: &str) -> Result<F::Resource> {
    cache.list().await?;
    cache
        .get(name)
        .with_context(|| format!("no {} named '{}'", F::NOUN, name))
}

fn print_snapshot<R: Resource>(snapshot: &CacheSnapshot<R>) {
    if snapshot.is_empty() {
        println!("{}", "Nothing yet".yellow());
        return;
    }
    for (tag, group) in &snapshot.groups {
        println!("{}", tag.cyan().bold());
        for resource in group {
            println!("  {} {}", resource.name().bright_white(), resource.params());
        }
    }
}

fn print_outcome<T>(outcome: Outcome<T>, done: &str) {
    match outcome {
        Outcome::Committed(_) => println!("{} {}", "✓".green(), done),
        Outcome::Rejected(rejection) => println!("{} {}", "⚠".yellow(), rejection),
        Outcome::NeedsParams(body) => {
            println!("{} The server needs more parameters:", "?".yellow());
            println!(
                "{}",
                serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
            );
        }
    }
}
