use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::timetable::Timetable;
use rollcall_store::SqliteStore;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall attendance administration CLI")]
struct Cli {
    /// Database path (default: $ROLLCALL_DB_PATH or the daemon's default)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show stored face data health per student
    Students,
    /// Drop corrupt face data entries
    Prune {
        /// Report what would be removed without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List attendance records for a day
    Attendance {
        /// Day to list, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Manage class timetables
    Timetable {
        #[command(subcommand)]
        command: TimetableCommands,
    },
    /// Show daemon status
    Status {
        /// Daemon base URL
        #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:5000")]
        url: String,
    },
}

#[derive(Subcommand)]
enum TimetableCommands {
    /// Import timetables from a JSON file (one timetable or a list)
    Import { file: PathBuf },
    /// Print every stored timetable
    Show,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimetableFile {
    Many(Vec<Timetable>),
    One(Timetable),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .or_else(|| std::env::var("ROLLCALL_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(rollcall_core::default_db_path);

    match cli.command {
        Commands::Status { url } => status(&url).await?,
        Commands::Students => {
            let store = open_store(&db_path).await?;
            let health = store.face_data_health().await?;
            if health.is_empty() {
                println!("No students with face data");
            }
            for h in health {
                let flag = if h.corrupt > 0 { "  CORRUPT" } else { "" };
                println!(
                    "{:<12} {:<28} {} entries, {} corrupt{}",
                    h.student_id, h.student_name, h.total, h.corrupt, flag
                );
            }
            println!("{} students registered", store.count_students().await?);
        }
        Commands::Prune { dry_run } => {
            let store = open_store(&db_path).await?;
            if dry_run {
                let affected: Vec<_> = store
                    .face_data_health()
                    .await?
                    .into_iter()
                    .filter(|h| h.corrupt > 0)
                    .collect();
                for h in &affected {
                    println!("would remove {} entries from {}", h.corrupt, h.student_id);
                }
                println!("{} students affected", affected.len());
            } else {
                let pruned = store.prune_corrupt_face_data().await?;
                for (student, removed) in &pruned {
                    println!("removed {removed} entries from {student}");
                }
                println!("{} students pruned", pruned.len());
            }
        }
        Commands::Attendance { date } => {
            let store = open_store(&db_path).await?;
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let records = store.attendance_on(date).await?;
            println!("Attendance for {date}: {} records", records.len());
            for r in records {
                println!(
                    "{} {:<12} {:<24} {:<20} P{:<4} {:>7.2} min",
                    r.time,
                    r.student_id,
                    r.student_name,
                    r.session_name,
                    r.period,
                    r.duration_minutes()
                );
            }
        }
        Commands::Timetable { command } => match command {
            TimetableCommands::Import { file } => {
                let store = open_store(&db_path).await?;
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let timetables = match serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", file.display()))?
                {
                    TimetableFile::Many(list) => list,
                    TimetableFile::One(t) => vec![t],
                };
                for t in timetables {
                    let label = format!("{} {} {}", t.class.department, t.class.year, t.class.division);
                    let periods = t.periods.len();
                    store.upsert_timetable(t).await.with_context(|| format!("importing {label}"))?;
                    println!("imported {label}: {periods} periods");
                }
            }
            TimetableCommands::Show => {
                let store = open_store(&db_path).await?;
                let timetables = store.list_timetables().await?;
                if timetables.is_empty() {
                    println!("No timetables stored");
                }
                for t in timetables {
                    println!("{} {} {}", t.class.department, t.class.year, t.class.division);
                    for p in &t.periods {
                        println!(
                            "  P{} {}-{} {:<28} {:<24} {}",
                            p.period_number,
                            p.start_time.format("%H:%M"),
                            p.end_time.format("%H:%M"),
                            p.subject,
                            p.teacher,
                            p.days.join(", ")
                        );
                    }
                }
            }
        },
    }
    Ok(())
}

async fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path)
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

async fn status(url: &str) -> Result<()> {
    let endpoint = format!("{}/health", url.trim_end_matches('/'));
    let resp = match reqwest::get(&endpoint).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::debug!(error = %err, "health request failed");
            println!("rollcalld: not reachable at {url}");
            return Ok(());
        }
    };
    let code = resp.status();
    let body: serde_json::Value = resp.json().await.context("decoding /health response")?;
    println!(
        "rollcalld: {} (HTTP {}), models ready: {}",
        body["status"].as_str().unwrap_or("unknown"),
        code.as_u16(),
        body["modelsReady"].as_bool().unwrap_or(false)
    );
    Ok(())
}
