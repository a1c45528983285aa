mod ingest;
mod media;
mod ml;
mod database;
mod archive;
mod extraction;
mod shell;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::{Result, Context, anyhow};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::database::auth::ensure_admin;
use crate::database::migrate;
use crate::database::repo::{CaseRecord, CaseRepository, CaseUpdate};
use crate::database::users::{NewUser, ProfileUpdate, RoleLevel, UserAccount, UserRepository};
use crate::extraction::orchestrator::Orchestrator;
use crate::media::preprocess::ImagePreprocessor;
use crate::media::render::select_renderer;
use crate::ml::extractor::{DetectorParams, MinutiaeExtractor, OnnxExtractor};
use crate::shell::controller::{CaseForm, ExtractionController, ShellEvent};
use crate::shell::session::Session;
use crate::utils::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "minutiae-case", version, about = "Fingerprint minutiae extraction and case archive")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (KEY=VALUE lines)
    #[arg(long, global = true, default_value = ".env")]
    config: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, global = true)]
    username: Option<String>,

    #[arg(short, long, global = true, env = "MINUTIAE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run extraction on a fingerprint image and store it as a new case
    Extract {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long)]
        title: String,
        #[arg(long)]
        report_number: Option<String>,
        #[arg(long)]
        incident_date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Browse and edit stored cases
    Cases {
        #[command(subcommand)]
        action: CaseAction,
    },
    /// Manage accounts
    Users {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Inspect detector model files
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand, Debug)]
enum CaseAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        report_number: Option<String>,
        #[arg(long)]
        incident_date: Option<String>,
    },
    Delete {
        id: i64,
    },
    Count,
}

#[derive(Args, Debug, Clone, Default)]
struct ProfileArgs {
    #[arg(long)]
    full_name: Option<String>,
    #[arg(long)]
    nrp: Option<String>,
    #[arg(long)]
    jabatan: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    email: Option<String>,
}

#[derive(Subcommand, Debug)]
enum UserAction {
    /// Create an account. Creating an elevated account needs an elevated login.
    Register {
        #[arg(long)]
        new_username: String,
        #[arg(long)]
        new_password: String,
        #[arg(long)]
        admin: bool,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    List {
        #[arg(long)]
        json: bool,
    },
    Show {
        id: i64,
    },
    Edit {
        id: i64,
        #[command(flatten)]
        profile: ProfileArgs,
        /// Role level: 0 standard, 1 elevated
        #[arg(long)]
        level: Option<i64>,
    },
    Passwd {
        /// Defaults to the signed-in account
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        new_password: String,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum ModelAction {
    Verify,
}

struct App {
    config: AppConfig,
    users: UserRepository,
    cases: CaseRepository,
}

impl App {
    fn start(config: AppConfig) -> Result<Self> {
        let report = migrate::initialize(&config.db_path)
            .with_context(|| format!("Failed to prepare database {:?}", config.db_path))?;
        if !report.failed.is_empty() {
            warn!("{} schema migration(s) failed: {:?}", report.failed.len(), report.failed);
        }
        let version = migrate::schema_version(&database::open(&config.db_path)?)?;
        info!("Database {:?} at schema version {} ({} column(s) added)", config.db_path, version, report.applied.len());

        let users = UserRepository::new(&config.db_path);
        ensure_admin(&users, &config.bootstrap_username, &config.bootstrap_password)
            .context("Failed to bootstrap the administrator account")?;

        let cases = CaseRepository::new(&config.db_path, &config.data_root);
        debug!("Case artifacts stored under {:?}", cases.data_root());
        Ok(Self { config, users, cases })
    }

    fn login(&self, cli: &Cli) -> Result<Session> {
        let username = cli.username.as_deref().ok_or_else(|| anyhow!("--username is required"))?;
        let password = cli
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("--password (or MINUTIAE_PASSWORD) is required"))?;
        Ok(Session::login(&self.users, username, password)?)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;

    let config = AppConfig::load(&cli.config)?;
    let app = App::start(config)?;

    match &cli.command {
        Command::Extract { image, title, report_number, incident_date, json } => {
            let session = app.login(&cli)?;
            let form = Arc::new(CaseForm {
                title: title.clone(),
                report_number: report_number.clone(),
                incident_date: incident_date.clone(),
                image_path: image.clone(),
                owner_id: session.user_id(),
            });
            let record = run_extraction(app, &form)?;
            if *json {
                print_json(&record)?;
            } else {
                print_case(&record);
            }
        }
        Command::Cases { action } => {
            let session = app.login(&cli)?;
            handle_cases(&app, &session, action)?;
        }
        Command::Users { action } => handle_users(&app, &cli, action)?,
        Command::Models { action: ModelAction::Verify } => {
            let mut config = app.config.clone();
            let dir = config.resolve_model_dir()?.to_path_buf();
            let extractor = OnnxExtractor::new(&dir, DetectorParams::default());
            let missing = extractor.files().missing();
            if missing.is_empty() {
                println!("All model files present in {}", dir.display());
            } else {
                for path in &missing {
                    println!("missing: {}", path.display());
                }
                extractor.verify_models()?;
            }
        }
    }

    Ok(())
}

fn run_extraction(app: App, form: &Arc<CaseForm>) -> Result<CaseRecord> {
    let mut config = app.config;
    let model_dir = config.resolve_model_dir()?.to_path_buf();

    // Renderer is chosen once per process.
    let renderer = select_renderer(&config.renderers, &config.render);
    let orchestrator = Orchestrator::new(
        &config.data_root,
        Arc::new(ImagePreprocessor::new(config.preprocess.clone())),
        Arc::new(OnnxExtractor::new(&model_dir, DetectorParams::default())),
        renderer,
    );
    info!(
        "Using '{}' renderer, models from {:?}, staging in {:?}",
        orchestrator.renderer_name(),
        model_dir,
        orchestrator.staging_dir()
    );

    let mut controller = ExtractionController::new(Arc::new(orchestrator), app.cases);
    controller.start(form)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut saved = None;
    let mut failure = None;
    while controller.is_running() {
        for event in controller.poll() {
            match event {
                ShellEvent::Progress(msg) => spinner.set_message(msg),
                ShellEvent::Saved { record, enhanced } => {
                    if !enhanced {
                        warn!("Image enhancement failed; markers were drawn on the original image");
                    }
                    saved = Some(record);
                }
                ShellEvent::Failed(f) => failure = Some(anyhow!("{:?}: {}", f.kind, f.message)),
                ShellEvent::Discarded => failure = Some(anyhow!("Extraction result was discarded")),
            }
        }
        thread::sleep(Duration::from_millis(50));
    }
    spinner.finish_and_clear();

    match (saved, failure) {
        (Some(record), _) => Ok(record),
        (None, Some(err)) => Err(err),
        (None, None) => Err(anyhow!("Extraction ended without a result")),
    }
}

fn handle_cases(app: &App, session: &Session, action: &CaseAction) -> Result<()> {
    match action {
        CaseAction::List { json } => {
            let records = app.cases.list_by_owner(session.case_scope())?;
            if *json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("No cases yet.");
            } else {
                for record in &records {
                    println!(
                        "{:>5}  {:<19}  {:<30}  {:>4}  {}",
                        record.id,
                        record.created_at,
                        record.title,
                        record.minutiae_count.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                        record.owner_username.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        CaseAction::Show { id, json } => {
            let record = session.case(&app.cases, *id)?;
            if *json {
                print_json(&record)?;
            } else {
                print_case(&record);
            }
        }
        CaseAction::Edit { id, title, report_number, incident_date } => {
            let current = session.case(&app.cases, *id)?;
            let update = CaseUpdate {
                title: title.clone().unwrap_or(current.title),
                report_number: report_number.clone().or(current.report_number),
                incident_date: incident_date.clone().or(current.incident_date),
            };
            app.cases.update(*id, &update)?;
            println!("Case {} updated.", id);
        }
        CaseAction::Delete { id } => {
            session.case(&app.cases, *id)?;
            if app.cases.delete(*id)? {
                println!("Case {} deleted.", id);
            }
        }
        CaseAction::Count => {
            println!("{}", app.cases.count(session.case_scope())?);
        }
    }
    Ok(())
}

fn handle_users(app: &App, cli: &Cli, action: &UserAction) -> Result<()> {
    match action {
        UserAction::Register { new_username, new_password, admin, profile } => {
            let mut user = NewUser::new(new_username, new_password);
            user.full_name = profile.full_name.clone();
            user.nrp = profile.nrp.clone();
            user.jabatan = profile.jabatan.clone();
            user.phone = profile.phone.clone();
            user.email = profile.email.clone();
            if *admin {
                app.login(cli)?.require_admin()?;
                user.role = RoleLevel::Elevated;
            }
            let id = app.users.register(&user)?;
            println!("Account '{}' created with id {}.", new_username.trim(), id);
        }
        UserAction::List { json } => {
            app.login(cli)?.require_admin()?;
            let users = app.users.list_all()?;
            if *json {
                print_json(&users)?;
            } else {
                for user in &users {
                    print_user(user);
                }
            }
        }
        UserAction::Show { id } => {
            let session = app.login(cli)?;
            session.require_self_or_admin(*id)?;
            print_user(&app.users.get_by_id(*id)?);
        }
        UserAction::Edit { id, profile, level } => {
            app.login(cli)?.require_admin()?;
            let current = app.users.get_by_id(*id)?;
            let mut update = ProfileUpdate::from(&current);
            merge(&mut update.full_name, &profile.full_name);
            merge(&mut update.nrp, &profile.nrp);
            merge(&mut update.jabatan, &profile.jabatan);
            merge(&mut update.phone, &profile.phone);
            merge(&mut update.email, &profile.email);
            if let Some(level) = level {
                update.role = RoleLevel::try_from(*level)?;
            }
            app.users.update_profile(*id, &update)?;
            println!("Account {} updated.", id);
        }
        UserAction::Passwd { id, new_password } => {
            let session = app.login(cli)?;
            let target = id.unwrap_or(session.user_id());
            session.require_self_or_admin(target)?;
            app.users.set_password(target, new_password)?;
            println!("Password changed.");
        }
        UserAction::Delete { id } => {
            let session = app.login(cli)?;
            session.require_admin()?;
            if *id == session.user_id() {
                return Err(anyhow!("Refusing to delete the signed-in account"));
            }
            if app.users.delete_cascade(*id)? {
                println!("Account {} and its cases deleted.", id);
            } else {
                println!("No account with id {}.", id);
            }
        }
    }
    Ok(())
}

fn merge(field: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        *field = Some(v.clone());
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_case(record: &CaseRecord) {
    println!("Case #{}: {}", record.id, record.title);
    println!("  Report number : {}", record.report_number.as_deref().unwrap_or("-"));
    println!("  Incident date : {}", record.incident_date.as_deref().unwrap_or("-"));
    println!("  Minutiae      : {}", record.minutiae_count.map(|c| c.to_string()).unwrap_or_else(|| "-".into()));
    println!("  Owner         : {}", record.owner_username.as_deref().unwrap_or("-"));
    println!("  Created       : {}", record.created_at);
    println!("  Raw image     : {}", display(&record.raw_artifact_path));
    println!("  Result image  : {}", display(&record.result_artifact_path));
}

fn print_user(user: &UserAccount) {
    let role = if user.is_elevated() { "admin" } else { "user" };
    println!(
        "{:>4}  {:<16}  {:<5}  {}  {}",
        user.id,
        user.username,
        role,
        user.full_name.as_deref().unwrap_or("-"),
        user.nrp.as_deref().unwrap_or(""),
    );
}

fn display(path: &str) -> String {
    if Path::new(path).is_file() {
        path.to_string()
    } else {
        format!("{} (missing)", path)
    }
}
