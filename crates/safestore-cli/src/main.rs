//! `safestore`: command-line front end for a SafeStore vault.
//!
//! Reads `safestore.toml` (or the path given with `--config`) plus any
//! `SAFESTORE_*` environment variables, opens the SQLite store, and runs one
//! command against it. The session persists in the store between runs.
//!
//! # Usage
//!
//! ```
//! safestore register alice@example.com
//! safestore login alice@example.com
//! safestore note new "Groceries" --content "milk, eggs"
//! safestore file put ./scan.pdf --mime application/pdf
//! safestore audit --limit 20
//! ```

mod fetch;

use std::{
  collections::HashMap,
  io::{self, BufRead, Write},
  path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use fetch::HttpImageSource;
use safestore_core::{
  Vault, VaultConfig,
  display::format_size,
  file::NewFile,
  identity::Role,
  note::Note,
  session::Session,
};
use safestore_store_sqlite::SqliteStore;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "safestore", version, about = "Personal note and file vault")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "safestore.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create an account.
  Register {
    email:    String,
    /// Grant the admin role.
    #[arg(long)]
    admin:    bool,
    /// Read from stdin when omitted.
    #[arg(long, env = "SAFESTORE_PASSWORD")]
    password: Option<String>,
  },
  /// Start a session.
  Login {
    email:    String,
    #[arg(long, env = "SAFESTORE_PASSWORD")]
    password: Option<String>,
  },
  /// End the current session.
  Logout,
  /// Show the current session.
  Whoami,
  #[command(subcommand)]
  Note(NoteCommand),
  #[command(subcommand)]
  File(FileCommand),
  #[command(subcommand)]
  Admin(AdminCommand),
  /// Show recent audit entries, newest first.
  Audit {
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Fetch a remote image and report what was retrieved.
  Preview {
    url:    String,
    /// Write the image bytes here.
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
}

#[derive(Subcommand)]
enum NoteCommand {
  /// Create a note.
  New {
    title:   String,
    #[arg(long, default_value = "")]
    content: String,
  },
  /// Change a note's title and/or content.
  Edit {
    id:      Uuid,
    #[arg(long)]
    title:   Option<String>,
    #[arg(long)]
    content: Option<String>,
  },
  Rm { id: Uuid },
  /// List notes, optionally filtered by a search query.
  Ls { query: Option<String> },
  /// Case-insensitive search over titles and content.
  Search { query: String },
  Show { id: Uuid },
}

#[derive(Subcommand)]
enum FileCommand {
  /// Upload a local file.
  Put {
    path: PathBuf,
    /// Stored name; defaults to the file name.
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value = "")]
    mime: String,
  },
  /// Write a stored file to disk.
  Get {
    id:     Uuid,
    /// Defaults to the stored name in the current directory.
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  Rm { id: Uuid },
  Ls,
}

#[derive(Subcommand)]
enum AdminCommand {
  Users,
  Notes,
  Files,
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(default)]
struct CliConfig {
  store_path:     PathBuf,
  /// Origin presented by cross-origin checked image fetches.
  preview_origin: String,
  vault:          VaultConfig,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      store_path:     PathBuf::from("safestore.db"),
      preview_origin: "http://localhost".to_string(),
      vault:          VaultConfig::default(),
    }
  }
}

/// `SAFESTORE_STORE_PATH`, `SAFESTORE_VAULT__SESSION_TTL_HOURS`, ...
fn environment() -> config::Environment {
  config::Environment::with_prefix("SAFESTORE")
    .prefix_separator("_")
    .separator("__")
}

fn load_config(path: &Path) -> Result<CliConfig> { load_config_from(path, environment()) }

fn load_config_from(path: &Path, env: config::Environment) -> Result<CliConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(env)
    .build()
    .context("failed to read config file")?;

  settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = load_config(&cli.config)?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let vault = Vault::new(store, cfg.vault);

  let session = vault.current_session().await?;
  let session = session.as_ref();

  match cli.command {
    Command::Register { email, admin, password } => {
      let password = password_or_stdin(password)?;
      let role = if admin { Role::Admin } else { Role::User };
      let reg = vault.register(session, &email, &password, role).await?;
      println!("registered {} ({})", reg.identity.email, reg.identity.role);
      if let Some(s) = reg.session {
        println!("logged in as {}", s.email);
      }
    }
    Command::Login { email, password } => {
      let password = password_or_stdin(password)?;
      let s = vault.login(&email, &password).await?;
      println!("logged in as {} ({})", s.email, s.role);
    }
    Command::Logout => match vault.logout(session).await? {
      Some(s) => println!("logged out {}", s.email),
      None => println!("not logged in"),
    },
    Command::Whoami => match session {
      Some(s) => print_session(s),
      None => println!("not logged in"),
    },
    Command::Note(cmd) => note_command(&vault, session, cmd).await?,
    Command::File(cmd) => file_command(&vault, session, cmd).await?,
    Command::Admin(cmd) => admin_command(&vault, session, cmd).await?,
    Command::Audit { limit } => {
      for entry in vault.audit_log(session, limit).await? {
        println!(
          "{}  {:<22} {:<28} {}",
          timestamp(entry.timestamp),
          entry.action,
          entry.actor_email,
          entry.details
        );
      }
    }
    Command::Preview { url, output } => {
      let source = HttpImageSource::new(cfg.preview_origin, vault.config().max_file_bytes)?;
      let preview = vault.preview_image(session, &url, &source).await?;
      println!(
        "{} {} via {} fetch",
        preview.image.content_type,
        format_size(preview.image.bytes.len() as u64),
        preview.mode
      );
      if let Some(path) = output {
        std::fs::write(&path, &preview.image.bytes)
          .with_context(|| format!("failed to write {path:?}"))?;
      }
    }
  }

  Ok(())
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn note_command(
  vault: &Vault<SqliteStore>,
  session: Option<&Session>,
  cmd: NoteCommand,
) -> Result<()> {
  match cmd {
    NoteCommand::New { title, content } => {
      let note = vault.create_note(session, &title, &content).await?;
      println!("{}", note.id);
    }
    NoteCommand::Edit { id, title, content } => {
      if title.is_none() && content.is_none() {
        bail!("nothing to change; pass --title and/or --content");
      }
      let current = vault.note(session, id).await?;
      let title = title.unwrap_or(current.title);
      let content = content.unwrap_or(current.content);
      vault.update_note(session, id, &title, &content).await?;
    }
    NoteCommand::Rm { id } => {
      if vault.delete_note(session, id).await?.is_none() {
        println!("no such note");
      }
    }
    NoteCommand::Ls { query } => print_notes(vault.search_notes(session, query.as_deref()).await?),
    NoteCommand::Search { query } => {
      let notes = vault.search_notes(session, Some(&query)).await?;
      if notes.is_empty() {
        println!("no notes match {query:?}");
      }
      print_notes(notes);
    }
    NoteCommand::Show { id } => {
      let note = vault.note(session, id).await?;
      println!("# {}", note.title);
      println!("created {}  updated {}", timestamp(note.created_at), timestamp(note.updated_at));
      println!();
      println!("{}", note.content);
    }
  }
  Ok(())
}

async fn file_command(
  vault: &Vault<SqliteStore>,
  session: Option<&Session>,
  cmd: FileCommand,
) -> Result<()> {
  match cmd {
    FileCommand::Put { path, name, mime } => {
      let content = std::fs::read(&path).with_context(|| format!("failed to read {path:?}"))?;
      let name = match name {
        Some(name) => name,
        None => path
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .context("path has no file name; pass --name")?,
      };
      let rec = vault
        .upload_file(session, NewFile { name, mime_type: mime, content })
        .await?;
      println!("{}  {}  {}", rec.id, rec.name, format_size(rec.size_bytes));
    }
    FileCommand::Get { id, output } => {
      let file = vault.download_file(session, id).await?;
      let path = output.unwrap_or_else(|| PathBuf::from(&file.name));
      std::fs::write(&path, &file.bytes).with_context(|| format!("failed to write {path:?}"))?;
      println!("{} ({}) -> {}", file.name, format_size(file.bytes.len() as u64), path.display());
    }
    FileCommand::Rm { id } => {
      if vault.delete_file(session, id).await?.is_none() {
        println!("no such file");
      }
    }
    FileCommand::Ls => {
      for f in vault.files(session).await? {
        println!(
          "{}  {:>10}  {:<24} {}",
          f.id,
          format_size(f.size_bytes),
          f.mime_type,
          f.name
        );
      }
    }
  }
  Ok(())
}

async fn admin_command(
  vault: &Vault<SqliteStore>,
  session: Option<&Session>,
  cmd: AdminCommand,
) -> Result<()> {
  let users = vault.all_users(session).await?;
  let owners: HashMap<Uuid, &str> = users.iter().map(|u| (u.id, u.email.as_str())).collect();
  let owner = |id: Uuid| owners.get(&id).copied().unwrap_or("unknown");

  match cmd {
    AdminCommand::Users => {
      for u in &users {
        println!("{}  {:<5}  {}  {}", u.id, u.role, timestamp(u.created_at), u.email);
      }
    }
    AdminCommand::Notes => {
      for note in vault.all_notes(session).await? {
        println!("{}  {:<28} {}", note.id, owner(note.owner_id), note.title);
      }
    }
    AdminCommand::Files => {
      for f in vault.all_files(session).await? {
        println!(
          "{}  {:<28} {:>10}  {}",
          f.id,
          owner(f.owner_id),
          format_size(f.size_bytes),
          f.name
        );
      }
    }
  }
  Ok(())
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn print_notes(notes: Vec<Note>) {
  for note in notes {
    println!("{}  {}  {}", note.id, timestamp(note.updated_at), note.title);
  }
}

fn print_session(s: &Session) {
  println!("{} ({})", s.email, s.role);
  println!("since   {}", timestamp(s.issued_at));
  match s.expires_at {
    Some(at) => println!("expires {}", timestamp(at)),
    None => println!("expires never"),
  }
}

fn timestamp(at: DateTime<Utc>) -> String {
  at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Use `password` if given, otherwise read one line from stdin.
fn password_or_stdin(password: Option<String>) -> Result<String> {
  if let Some(password) = password {
    return Ok(password);
  }
  eprint!("Password: ");
  io::stderr().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
