//! `umbra` command line: run statements against a plocal storage and check keys.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use umbra::{
    GraphConfig, GraphFactory, Session, UmbraError, STORAGE_ENCRYPTION_KEY,
    STORAGE_ENCRYPTION_METHOD,
};

#[derive(Parser, Debug)]
#[command(
    name = "umbra",
    version,
    about = "Command line access to encrypted Umbra graph storage",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "UMBRA_URL",
        value_name = "URL",
        help = "Connection URL, e.g. plocal:/var/lib/umbra/people"
    )]
    url: Option<String>,

    #[arg(
        long,
        global = true,
        env = "UMBRA_KEY",
        hide_env_values = true,
        value_name = "BASE64",
        help = "Base64 encryption key"
    )]
    key: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "METHOD",
        help = "Encryption method: aes, des or none"
    )]
    method: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or more mutating statements, each committed on its own.
    Command {
        #[arg(value_name = "SQL", required = true)]
        sql: Vec<String>,
    },
    /// Run a SELECT and print one JSON object per record.
    Query {
        #[arg(value_name = "SQL")]
        sql: String,
    },
    /// Open the storage with the given key and report whether it is accepted.
    CheckKey,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("umbra").join("config.toml"))
}

fn load_config(explicit: Option<&Path>) -> Result<GraphConfig, UmbraError> {
    match explicit {
        Some(path) => GraphConfig::load(path),
        None => match default_config_path() {
            Some(path) if path.is_file() => GraphConfig::load(path),
            _ => Ok(GraphConfig::default()),
        },
    }
}

fn open_factory(args: &OpenArgs) -> Result<GraphFactory, UmbraError> {
    let config = load_config(args.config.as_deref())?;
    let url = args
        .url
        .clone()
        .or_else(|| config.url.clone())
        .ok_or_else(|| UmbraError::Config("no connection url; pass --url".into()))?;
    let factory = GraphFactory::with_config(&url, &config)?;
    if let Some(method) = &args.method {
        factory.set_property(STORAGE_ENCRYPTION_METHOD, method);
    }
    if let Some(key) = &args.key {
        factory.set_property(STORAGE_ENCRYPTION_KEY, key);
    }
    Ok(factory)
}

fn run_commands(db: &mut Session, sql: &[String]) -> Result<(), UmbraError> {
    let mut total = 0;
    for stmt in sql {
        total += db.command(stmt)?;
    }
    println!("{total} record(s) affected");
    Ok(())
}

fn run_query(db: &Session, sql: &str) -> Result<(), Box<dyn Error>> {
    for record in db.query(sql)? {
        println!("{}", serde_json::to_string(&record.to_json())?);
    }
    Ok(())
}

fn check_key(db: &Session) -> Result<(), UmbraError> {
    let handle = db.storage();
    let stats = handle.stats()?;
    println!(
        "ok: {} opened with {} ({} classes, {} records{})",
        handle.url(),
        handle.config().encryption.method(),
        stats.classes,
        stats.records,
        if stats.recovered { ", recovered" } else { "" }
    );
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let factory = open_factory(&cli.open)?;
    let mut db = factory.get_no_tx()?;
    let outcome: Result<(), Box<dyn Error>> = match &cli.command {
        Command::Command { sql } => run_commands(&mut db, sql).map_err(Into::into),
        Command::Query { sql } => run_query(&db, sql),
        Command::CheckKey => check_key(&db).map_err(Into::into),
    };
    db.close();
    factory.close()?;
    outcome
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
