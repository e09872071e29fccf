use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use presensi_core::{
    Coordinates, Dashboard, Geofence, Presensi, PresensiError, StudentProfile, SystemClock, Upload,
};
use presensi_store::SqliteStore;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod encoder;

use config::Config;
use encoder::PrecomputedEncoder;

#[derive(Parser)]
#[command(name = "presensi", about = "Face-recognition school attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PhotoArgs {
    /// Photo file (JPG, JPEG or PNG)
    #[arg(long)]
    photo: PathBuf,
    /// JSON array of face vectors computed from the photo
    #[arg(long)]
    encodings: PathBuf,
}

#[derive(Args)]
struct PositionArgs {
    /// Latitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,
    /// Longitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new student from a face photo
    Register {
        #[arg(long)]
        name: String,
        /// Class label (e.g. "X")
        #[arg(long)]
        class: String,
        /// Major (e.g. "SIJA1")
        #[arg(long)]
        major: String,
        #[command(flatten)]
        photo: PhotoArgs,
    },
    /// Record today's arrival
    CheckIn {
        #[command(flatten)]
        photo: PhotoArgs,
        #[command(flatten)]
        position: PositionArgs,
    },
    /// Record today's departure
    CheckOut {
        #[command(flatten)]
        photo: PhotoArgs,
        #[command(flatten)]
        position: PositionArgs,
    },
    /// Show the roll number the next registration in a cohort would receive
    NextId {
        #[arg(long)]
        class: String,
        #[arg(long)]
        major: String,
    },
    /// List registered students
    Students,
    /// List attendance records, newest first
    Attendance {
        /// Only records of this day (YYYY-MM-DD)
        #[arg(long)]
        day: Option<NaiveDate>,
        /// Only today's records
        #[arg(long, conflicts_with = "day")]
        today: bool,
    },
    /// Show today's dashboard figures
    Stats,
    /// Show or change the attendance area
    Area {
        #[command(subcommand)]
        action: AreaCommand,
    },
    /// Delete every student and attendance record
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AreaCommand {
    Show,
    Set {
        #[command(flatten)]
        position: PositionArgs,
        /// Radius in meters
        #[arg(long)]
        radius: f64,
    },
}

#[derive(Serialize)]
struct Stats {
    #[serde(flatten)]
    dashboard: Dashboard,
    registered_faces: usize,
}

type App = Presensi<SqliteStore, PrecomputedEncoder, SystemClock>;

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = std::fs::read(path).with_context(|| format!("reading photo {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload::new(filename, bytes))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn run(command: Commands, config: &Config) -> Result<Value> {
    let store = SqliteStore::open(&config.db_path, config.settings.default_geofence)?;
    let encoder = match &command {
        Commands::Register { photo, .. }
        | Commands::CheckIn { photo, .. }
        | Commands::CheckOut { photo, .. } => PrecomputedEncoder::load(&photo.encodings)?,
        _ => PrecomputedEncoder::default(),
    };
    let app: App = Presensi::new(store, encoder, SystemClock, config.settings.clone());

    match command {
        Commands::Register {
            name,
            class,
            major,
            photo,
        } => {
            let profile = StudentProfile::new(&name, &class, &major)?;
            let student = app.register(profile, &read_upload(&photo.photo)?)?;
            to_json(&student)
        }
        Commands::CheckIn { photo, position } => {
            let at = Coordinates::new(position.lat, position.lon)?;
            to_json(&app.check_in(&read_upload(&photo.photo)?, at)?)
        }
        Commands::CheckOut { photo, position } => {
            let at = Coordinates::new(position.lat, position.lon)?;
            to_json(&app.check_out(&read_upload(&photo.photo)?, at)?)
        }
        Commands::NextId { class, major } => {
            let roll_number = app.next_roll_number(&class, &major)?;
            Ok(json!({ "roll_number": roll_number }))
        }
        Commands::Students => to_json(&app.students()?),
        Commands::Attendance { day, today } => {
            let day = if today { Some(app.today()) } else { day };
            to_json(&app.attendance(day)?)
        }
        Commands::Stats => to_json(&Stats {
            dashboard: app.dashboard()?,
            registered_faces: app.registered_faces()?,
        }),
        Commands::Area { action } => {
            if let AreaCommand::Set { position, radius } = action {
                let center = Coordinates::new(position.lat, position.lon)?;
                app.set_geofence(Geofence::new(center, radius)?)?;
            }
            to_json(&app.geofence()?)
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every record without --yes");
            }
            app.reset_all()?;
            Ok(json!({ "reset": true }))
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let (body, code) = match run(cli.command, &config) {
        Ok(data) => (json!({ "success": true, "data": data }), ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<PresensiError>() {
            Some(err) => {
                tracing::info!(kind = err.kind(), error = %err, "request rejected");
                let code = if err.is_rejection() {
                    ExitCode::from(2)
                } else {
                    ExitCode::FAILURE
                };
                (
                    json!({ "success": false, "error": err.kind(), "message": err.to_string() }),
                    code,
                )
            }
            None => {
                tracing::error!(error = %format!("{e:#}"), "command failed");
                (
                    json!({ "success": false, "error": "processing_failed", "message": format!("{e:#}") }),
                    ExitCode::FAILURE,
                )
            }
        },
    };
    println!("{body}");
    code
}
