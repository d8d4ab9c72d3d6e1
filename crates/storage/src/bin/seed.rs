use std::fmt;

use chrono::{DateTime, Utc};
use course_core::model::{
    AnswerOption, OptionId, Question, QuestionId, QuestionKind, QuizDraft, Role, User, UserId,
};
use storage::repository::{NewVideoRecord, Storage};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    videos: u32,
    learner_email: String,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidVideos { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidVideos { raw } => write!(f, "invalid --videos value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("GATE_DB_URL")
            .unwrap_or_else(|_| "sqlite://gate.sqlite3?mode=rwc".into());
        let mut videos = std::env::var("GATE_SEED_VIDEOS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(3);
        let mut learner_email = std::env::var("GATE_SEED_LEARNER")
            .unwrap_or_else(|_| "learner@localhost".into());
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--videos" => {
                    let value = require_value(&mut args, "--videos")?;
                    videos = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidVideos { raw: value.clone() })?;
                }
                "--learner" => {
                    learner_email = require_value(&mut args, "--learner")?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            videos,
            learner_email,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://gate.sqlite3?mode=rwc)");
    eprintln!("  --videos <n>              Published videos to append, each with a quiz (default: 3)");
    eprintln!("  --learner <email>         Learner account to create if missing");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  GATE_DB_URL, GATE_SEED_VIDEOS, GATE_SEED_LEARNER");
}

fn demo_questions(lesson: u32) -> Vec<Question> {
    vec![
        Question::new(
            QuestionId::new(1),
            format!("Which lesson is this? (lesson {lesson})"),
            1,
            QuestionKind::MultipleChoice {
                options: vec![
                    AnswerOption::new(OptionId::new(1), format!("Lesson {lesson}"), true),
                    AnswerOption::new(OptionId::new(2), "Some other lesson", false),
                ],
            },
        ),
        Question::new(
            QuestionId::new(2),
            "Videos unlock in order",
            1,
            QuestionKind::TrueFalse {
                correct_answer: true,
            },
        ),
    ]
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    // append after whatever the catalog already holds
    let next_order = storage
        .videos
        .list_videos()
        .await?
        .last()
        .map_or(1, |v| v.order() + 1);

    for offset in 0..args.videos {
        let order = next_order + offset;
        let video_id = storage
            .videos
            .insert_new_video(NewVideoRecord {
                title: format!("Lesson {order}"),
                order,
                duration_secs: 600,
                is_published: true,
                created_at: now,
            })
            .await?;

        let quiz = QuizDraft {
            video_id,
            title: format!("Lesson {order} check"),
            questions: demo_questions(order),
            passing_score: 80,
            is_active: true,
        }
        .validate(now)?;
        storage.quizzes.insert_new_quiz(&quiz).await?;
    }

    if storage
        .users
        .find_user_by_email(&args.learner_email)
        .await?
        .is_none()
    {
        let learner = User::new(
            UserId::random(),
            args.learner_email.clone(),
            Some("Demo learner".into()),
            Role::Learner,
            now,
        )?;
        storage.users.insert_user(&learner).await?;
    }

    println!(
        "Seeded {} videos starting at order {} and learner {} into {}",
        args.videos, next_order, args.learner_email, args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
