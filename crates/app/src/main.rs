use std::fmt;
use std::path::PathBuf;

use services::{
    AppServices, AppServicesError, Clock, EngineConfig, ProgressServiceError, QuizFlowError,
    SessionError,
};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tutor_core::model::{LessonId, LessonStatus, TopicId, UserId};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidValue { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required for this command"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidValue { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
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
    eprintln!("  cargo run -p app -- summary   --user <id> [options]");
    eprintln!("  cargo run -p app -- available --user <id> [options]");
    eprintln!("  cargo run -p app -- quiz      --user <id> --topic <id> --lesson <n> [options]");
    eprintln!("  cargo run -p app -- reset     --user <id> [options]");
    eprintln!("  cargo run -p app -- stats     [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>   TOML configuration file");
    eprintln!("  --db <url>        SQLite database (overrides config and TUTOR_DB_URL)");
    eprintln!("  --verbose         debug logging (RUST_LOG overrides)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TUTOR_DB_URL, TUTOR_PASS_THRESHOLD, TUTOR_QUESTIONS_PER_LESSON,");
    eprintln!("  TUTOR_AI_BASE_URL, TUTOR_AI_API_KEY, TUTOR_AI_MODEL");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Summary,
    Available,
    Quiz,
    Reset,
    Stats,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "summary" => Some(Self::Summary),
            "available" => Some(Self::Available),
            "quiz" => Some(Self::Quiz),
            "reset" => Some(Self::Reset),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    db_url: Option<String>,
    user: Option<UserId>,
    topic: Option<TopicId>,
    lesson: Option<LessonId>,
    verbose: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(require_value(args, "--config")?)),
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = Some(normalize_sqlite_url(value));
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    let user = value.parse().map_err(|_| ArgsError::InvalidValue {
                        flag: "--user",
                        raw: value.clone(),
                    })?;
                    parsed.user = Some(user);
                }
                "--topic" => {
                    let value = require_value(args, "--topic")?;
                    let topic = value.parse().map_err(|_| ArgsError::InvalidValue {
                        flag: "--topic",
                        raw: value.clone(),
                    })?;
                    parsed.topic = Some(topic);
                }
                "--lesson" => {
                    let value = require_value(args, "--lesson")?;
                    let lesson = value.parse().map_err(|_| ArgsError::InvalidValue {
                        flag: "--lesson",
                        raw: value.clone(),
                    })?;
                    parsed.lesson = Some(lesson);
                }
                "--verbose" | "-v" => parsed.verbose = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn user(&self) -> Result<&UserId, ArgsError> {
        self.user.as_ref().ok_or(ArgsError::MissingFlag { flag: "--user" })
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
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}?mode=rwc", absolute.display())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" || !db_url.starts_with("sqlite://") {
        return Ok(());
    }

    let path = db_url.trim_start_matches("sqlite://");
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
    Ok(())
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

async fn print_summary(services: &AppServices, user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let summary = services.progress().summary(user).await?;
    let position = summary.user.current_position();
    println!(
        "{user}: {} lessons completed, average {:.1}, overall {:.0}%, {} active day(s)",
        summary.user.total_lessons_completed(),
        summary.user.total_score(),
        summary.overall_completion,
        summary.active_days,
    );
    println!("next: {} lesson {}", position.topic_id, position.lesson_id);
    for topic in &summary.topics {
        let agg = &topic.aggregate;
        println!(
            "\n{} [{}] {}/{} ({:.0}%){}",
            topic.title,
            agg.topic_id,
            agg.completed_lessons,
            agg.total_lessons,
            agg.completion_percentage(),
            agg.average_score
                .map(|avg| format!(", average {avg:.1}"))
                .unwrap_or_default(),
        );
        for lesson in &topic.lessons {
            println!(
                "  {:>2}. {:<32} {:<12} attempts {}{}",
                lesson.lesson_id,
                lesson.title,
                format!("{:?}", lesson.status),
                lesson.attempts,
                lesson
                    .best_score
                    .map(|best| format!(", best {best:.0}"))
                    .unwrap_or_default(),
            );
        }
    }
    if !summary.weak_topics.is_empty() {
        let weak: Vec<String> = summary.weak_topics.iter().map(ToString::to_string).collect();
        println!("\nneeds review: {}", weak.join(", "));
    }
    if !summary.strong_topics.is_empty() {
        let strong: Vec<String> = summary.strong_topics.iter().map(ToString::to_string).collect();
        println!("strong: {}", strong.join(", "));
    }
    Ok(())
}

async fn print_available(services: &AppServices, user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let availability = services.progress().available(user).await?;
    for topic in services.curriculum().topics() {
        let lessons: Vec<String> = availability
            .lessons(&topic.id)
            .map(|set| set.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        println!("{}: lessons {}", topic.id, lessons.join(", "));
    }
    Ok(())
}

async fn run_quiz(
    services: &AppServices,
    user: &UserId,
    topic: &TopicId,
    lesson: LessonId,
) -> Result<(), Box<dyn std::error::Error>> {
    let flow = services.flow();
    let started = flow.start(user, topic, lesson).await?;
    debug!(attempts = ?started.report.attempts, "question supply");
    let session = started.session;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for (index, question) in session.questions().iter().enumerate() {
        println!("\n{}/{} {}", index + 1, session.total_questions(), question.text());
        for (n, option) in question.options().iter().enumerate() {
            println!("  {}) {option}", n + 1);
        }

        let chosen = loop {
            let Some(line) = lines.next_line().await? else {
                println!("\ninput closed; the session stays open and can be restarted");
                return Ok(());
            };
            match line.trim().parse::<usize>() {
                Ok(n @ 1..=4) => break n - 1,
                _ => println!("enter a number from 1 to 4"),
            }
        };

        let feedback = flow.answer(session.id(), chosen).await?;
        if feedback.answer.is_correct {
            println!("correct");
        } else {
            println!(
                "incorrect, the answer was {}",
                question.options()[feedback.correct_answer]
            );
        }
        if !feedback.explanation.is_empty() {
            println!("{}", feedback.explanation);
        }
    }

    let finished = flow.finish(session.id()).await?;
    let threshold = services.config().pass_threshold;
    println!(
        "\nscore {}% ({}; pass mark {threshold}%)",
        finished.result.score,
        if finished.result.passed { "passed" } else { "not passed" },
    );
    if finished.result.lesson_completed {
        let next: Vec<String> = finished
            .availability
            .lessons(topic)
            .map(|set| set.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        println!("lesson completed; open lessons in {topic}: {}", next.join(", "));
    }
    let view = services.progress().lesson(user, topic, lesson).await?;
    if view.status == LessonStatus::Completed {
        if let Some(progress) = &view.progress {
            println!("best score {:.0} after {} attempt(s)", progress.best_score(), progress.attempts());
        }
    }
    Ok(())
}

async fn reset(services: &AppServices, user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let counts = services.progress().reset(user).await?;
    println!(
        "removed {} lesson record(s) and {} session(s) for {user}",
        counts.lessons, counts.sessions
    );
    Ok(())
}

async fn stats(services: &AppServices) -> Result<(), Box<dyn std::error::Error>> {
    let stats = services.progress().statistics().await?;
    println!("learners:          {}", stats.counts.total_users);
    println!("active learners:   {}", stats.counts.active_users);
    println!("lesson records:    {}", stats.counts.lesson_rows);
    println!("completed lessons: {}", stats.counts.completed_lessons);
    println!("completion rate:   {:.1}%", stats.completion_rate);
    Ok(())
}

const STORAGE_UNAVAILABLE: &str = "storage is unavailable, please retry later";

fn is_storage_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    if let Some(e) = err.downcast_ref::<QuizFlowError>() {
        return e.is_storage();
    }
    if let Some(e) = err.downcast_ref::<ProgressServiceError>() {
        return e.is_storage();
    }
    if let Some(e) = err.downcast_ref::<SessionError>() {
        return e.is_storage();
    }
    if let Some(e) = err.downcast_ref::<AppServicesError>() {
        return e.is_storage();
    }
    err.is::<StorageError>() || err.is::<SqliteInitError>()
}

/// Storage outages are reported without internals.
fn user_message(err: &(dyn std::error::Error + 'static)) -> String {
    if is_storage_failure(err) {
        return STORAGE_UNAVAILABLE.to_string();
    }
    match err.downcast_ref::<QuizFlowError>() {
        Some(QuizFlowError::Session(e)) if e.is_retryable() => {
            format!("{e}; restart the quiz to continue")
        }
        _ => err.to_string(),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
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

    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    init_logging(args.verbose);

    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(db_url) = &args.db_url {
        config.database_url.clone_from(db_url);
    }
    prepare_sqlite_file(&config.database_url)?;
    let services = AppServices::new_sqlite(config, Clock::default()).await?;

    match cmd {
        Command::Summary => print_summary(&services, args.user()?).await,
        Command::Available => print_available(&services, args.user()?).await,
        Command::Quiz => {
            let topic = args.topic.as_ref().ok_or(ArgsError::MissingFlag { flag: "--topic" })?;
            let lesson = args.lesson.ok_or(ArgsError::MissingFlag { flag: "--lesson" })?;
            run_quiz(&services, args.user()?, topic, lesson).await
        }
        Command::Reset => reset(&services, args.user()?).await,
        Command::Stats => stats(&services).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{}", user_message(err.as_ref()));
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        Args::parse(&mut args.iter().map(ToString::to_string))
    }

    #[test]
    fn parses_quiz_arguments() {
        let args = parse(&[
            "--user", "ada", "--topic", "risk_basics", "--lesson", "2", "--verbose",
        ])
        .unwrap();
        assert_eq!(args.user.unwrap().as_str(), "ada");
        assert_eq!(args.topic.unwrap().as_str(), "risk_basics");
        assert_eq!(args.lesson, Some(LessonId::new(2)));
        assert!(args.verbose);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse(&["--lesson", "two"]),
            Err(ArgsError::InvalidValue { flag: "--lesson", .. })
        ));
        assert!(matches!(
            parse(&["--user"]),
            Err(ArgsError::MissingValue { flag: "--user" })
        ));
        assert!(matches!(parse(&["--bogus"]), Err(ArgsError::UnknownArg(_))));
        assert!(matches!(
            parse(&[]).unwrap().user(),
            Err(ArgsError::MissingFlag { flag: "--user" })
        ));
    }

    #[test]
    fn relative_db_paths_become_absolute_urls() {
        let url = normalize_sqlite_url("data/tutor.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/tutor.sqlite3?mode=rwc"));
        assert_eq!(
            normalize_sqlite_url("sqlite::memory:".into()),
            "sqlite::memory:"
        );
    }

    #[test]
    fn every_storage_route_gets_the_generic_message() {
        let outage = || StorageError::Connection("sqlx: pool timed out".into());
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(QuizFlowError::Session(SessionError::Persistence(outage()))),
            Box::new(QuizFlowError::Progress(ProgressServiceError::Storage(outage()))),
            Box::new(ProgressServiceError::Storage(outage())),
            Box::new(SessionError::Persistence(outage())),
            Box::new(AppServicesError::Storage(outage())),
            Box::new(outage()),
        ];
        for err in errors {
            let message = user_message(err.as_ref());
            assert_eq!(message, STORAGE_UNAVAILABLE);
            assert!(!message.contains("sqlx"));
        }
    }

    #[test]
    fn other_errors_keep_their_own_text() {
        let err: Box<dyn std::error::Error> = Box::new(QuizFlowError::Session(
            SessionError::SessionConflict,
        ));
        assert!(user_message(err.as_ref()).ends_with("restart the quiz to continue"));

        let err: Box<dyn std::error::Error> = Box::new(ArgsError::UnknownArg("--x".into()));
        assert_eq!(user_message(err.as_ref()), "unknown argument: --x");
    }
}
