use std::fmt;

use course_core::model::{UserId, VideoId};
use serde_json::json;
use services::{AppServices, Clock, EngineConfig, UserService};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_URL: &str = "sqlite://gate.sqlite3";
const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";
const DEFAULT_LOG_FILTER: &str = "app=info,services=info,storage=warn";

#[derive(Debug, PartialEq, Eq)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str, command: Command },
    UnknownArg(String),
    InvalidVideoId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag, command } => {
                write!(f, "{} requires {flag}", command.name())
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidVideoId { raw } => write!(f, "invalid --video value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- check-access   --user <id|email> --video <id> [options]");
    eprintln!("  cargo run -p app -- progress       --user <id|email> [options]");
    eprintln!("  cargo run -p app -- stats          --user <id|email> [options]");
    eprintln!("  cargo run -p app -- platform-stats [options]");
    eprintln!("  cargo run -p app -- reset-progress --user <id|email> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>        SQLite URL (default: {DEFAULT_DB_URL})");
    eprintln!("  --admin-email <email>    Admin account ensured at startup");
    eprintln!("                           (default: {DEFAULT_ADMIN_EMAIL})");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  GATE_DB_URL, GATE_ADMIN_EMAIL");
    eprintln!("  GATE_WATCH_COMPLETION_THRESHOLD, GATE_MAX_WRITE_ATTEMPTS");
    eprintln!("  RUST_LOG (default: {DEFAULT_LOG_FILTER})");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    CheckAccess,
    Progress,
    Stats,
    PlatformStats,
    ResetProgress,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "check-access" => Some(Self::CheckAccess),
            "progress" => Some(Self::Progress),
            "stats" => Some(Self::Stats),
            "platform-stats" => Some(Self::PlatformStats),
            "reset-progress" => Some(Self::ResetProgress),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::CheckAccess => "check-access",
            Self::Progress => "progress",
            Self::Stats => "stats",
            Self::PlatformStats => "platform-stats",
            Self::ResetProgress => "reset-progress",
        }
    }

    fn needs_user(self) -> bool {
        !matches!(self, Self::PlatformStats)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    db_url: String,
    admin_email: String,
    /// A user id or an email address; resolved once storage is open.
    user: Option<String>,
    video_id: Option<VideoId>,
}

impl Args {
    fn parse(
        command: Command,
        args: &mut impl Iterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ArgsError> {
        let mut db_url =
            env("GATE_DB_URL").map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url);
        let mut admin_email =
            env("GATE_ADMIN_EMAIL").unwrap_or_else(|| DEFAULT_ADMIN_EMAIL.into());
        let mut user = None;
        let mut video_id = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--admin-email" => {
                    admin_email = require_value(args, "--admin-email")?;
                }
                "--user" => {
                    user = Some(require_value(args, "--user")?);
                }
                "--video" => {
                    let value = require_value(args, "--video")?;
                    let parsed: VideoId = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidVideoId { raw: value.clone() })?;
                    video_id = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        if command.needs_user() && user.is_none() {
            return Err(ArgsError::MissingFlag {
                flag: "--user",
                command,
            });
        }
        if command == Command::CheckAccess && video_id.is_none() {
            return Err(ArgsError::MissingFlag {
                flag: "--video",
                command,
            });
        }

        Ok(Self {
            db_url,
            admin_email,
            user,
            video_id,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Accepts either a user id or the email of an existing account.
async fn resolve_user(
    users: &UserService,
    raw: &str,
) -> Result<UserId, Box<dyn std::error::Error>> {
    if let Ok(id) = raw.parse::<UserId>() {
        return Ok(id);
    }
    match users.find_by_email(raw).await? {
        Some(user) => Ok(user.id()),
        None => Err(format!("no user with id or email {raw}").into()),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Err(ArgsError::MissingValue { flag: "<command>" }.into());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(cmd, &mut argv, |key| std::env::var(key).ok()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_logging();

    let services = open_services(&parsed, Clock::system(), EngineConfig::from_env()).await?;
    tracing::info!(command = cmd.name(), admin = %services.admin().id(), "storage ready");

    let output = execute(&services, cmd, &parsed).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Open (and migrate) the database behind `args.db_url` and make sure the
/// admin account exists.
async fn open_services(
    args: &Args,
    clock: Clock,
    config: EngineConfig,
) -> Result<AppServices, Box<dyn std::error::Error>> {
    prepare_sqlite_file(&args.db_url)?;
    let services =
        AppServices::new_sqlite(&args.db_url, clock, config, &args.admin_email).await?;
    Ok(services)
}

async fn execute(
    services: &AppServices,
    cmd: Command,
    parsed: &Args,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let progression = services.progression();
    let user_id = match parsed.user.as_deref() {
        Some(raw) => Some(resolve_user(&services.users(), raw).await?),
        None => None,
    };

    let output = match (cmd, user_id, parsed.video_id) {
        (Command::CheckAccess, Some(user_id), Some(video_id)) => {
            let decision = progression.access_decision(user_id, video_id).await?;
            json!({
                "userId": user_id.to_string(),
                "videoId": video_id.value(),
                "granted": decision.is_granted(),
                "reason": format!("{decision:?}"),
            })
        }
        (Command::Progress, Some(user_id), _) => {
            serde_json::to_value(progression.get_progress(user_id).await?)?
        }
        (Command::Stats, Some(user_id), _) => {
            serde_json::to_value(progression.get_stats(user_id).await?)?
        }
        (Command::PlatformStats, _, _) => {
            serde_json::to_value(progression.platform_stats().await?)?
        }
        (Command::ResetProgress, Some(user_id), _) => {
            serde_json::to_value(progression.reset_progress(user_id).await?)?
        }
        _ => return Err(ArgsError::MissingValue { flag: "--user" }.into()),
    };
    Ok(output)
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
