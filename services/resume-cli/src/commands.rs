//! Command line parsing and dispatch

use std::path::{Path, PathBuf};

use orchestrator::Orchestrator;
use tracing::{info, warn};

use crate::api::{
    Analysis, AnalysisApi, AuthApi, NewAnalysis, PaymentApi, ProfileUpdate, Registration,
    ResumeApi,
};
use crate::config::{Config, resolve_password};
use crate::error::{Error, MAX_RESUME_BYTES, MIN_JOB_DESCRIPTION_CHARS, Result};

pub const USAGE: &str = "\
usage: resume-cli [--config PATH] [--metrics] <command>

commands:
  login <email> [--password-file PATH]
  register <email> --first-name NAME --last-name NAME [--password-file PATH]
  logout
  whoami
  update-profile [--first-name NAME] [--last-name NAME]
  upload <resume-file.pdf|.docx>
  resumes [resume-id]
  delete <resume-id>
  analyze <resume-id> <job-description-file> [--title T] [--company C] [--watch]
  status <analysis-id>
  watch <analysis-id>
  checkout <resume-id>

The password is read from RESUME_PASSWORD or --password-file.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        email: String,
        password_file: Option<PathBuf>,
    },
    Register {
        email: String,
        first_name: String,
        last_name: String,
        password_file: Option<PathBuf>,
    },
    Logout,
    Whoami,
    UpdateProfile(ProfileUpdate),
    Upload {
        file: PathBuf,
    },
    Resumes {
        resume_id: Option<i64>,
    },
    Delete {
        resume_id: i64,
    },
    Analyze {
        resume_id: i64,
        job_description_file: PathBuf,
        title: String,
        company: String,
        watch: bool,
    },
    Status {
        analysis_id: String,
    },
    Watch {
        analysis_id: String,
    },
    Checkout {
        resume_id: i64,
    },
}

impl Command {
    /// Metric label
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::Register { .. } => "register",
            Command::Logout => "logout",
            Command::Whoami => "whoami",
            Command::UpdateProfile(_) => "update-profile",
            Command::Upload { .. } => "upload",
            Command::Resumes { .. } => "resumes",
            Command::Delete { .. } => "delete",
            Command::Analyze { .. } => "analyze",
            Command::Status { .. } => "status",
            Command::Watch { .. } => "watch",
            Command::Checkout { .. } => "checkout",
        }
    }
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_path: Option<String>,
    pub metrics: bool,
    pub command: Command,
}

/// Split `--flag value` pairs and boolean switches from positional arguments.
struct Args {
    positional: Vec<String>,
    options: Vec<(String, String)>,
    switches: Vec<String>,
}

const SWITCHES: &[&str] = &["--metrics", "--watch"];

impl Args {
    fn split(args: &[String]) -> Result<Self> {
        let mut parsed = Args {
            positional: Vec::new(),
            options: Vec::new(),
            switches: Vec::new(),
        };
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if SWITCHES.contains(&arg.as_str()) {
                parsed.switches.push(arg.clone());
            } else if arg.starts_with("--") {
                let value = iter
                    .next()
                    .ok_or_else(|| Error::Usage(format!("{arg} needs a value")))?;
                parsed.options.push((arg.clone(), value.clone()));
            } else {
                parsed.positional.push(arg.clone());
            }
        }
        Ok(parsed)
    }

    fn option(&self, name: &str) -> Option<String> {
        self.options
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    fn switch(&self, name: &str) -> bool {
        self.switches.iter().any(|s| s == name)
    }

    fn positional(&self, index: usize, what: &str) -> Result<String> {
        self.positional
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Usage(format!("missing {what}")))
    }
}

fn parse_id(value: &str, what: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| Error::Usage(format!("{what} must be a number, got: {value}")))
}

/// Parse arguments (without the program name).
pub fn parse(args: &[String]) -> Result<Invocation> {
    let args = Args::split(args)?;
    let name = args.positional(0, "command")?;

    let command = match name.as_str() {
        "login" => Command::Login {
            email: args.positional(1, "email")?,
            password_file: args.option("--password-file").map(PathBuf::from),
        },
        "register" => Command::Register {
            email: args.positional(1, "email")?,
            first_name: args
                .option("--first-name")
                .ok_or_else(|| Error::Usage("missing --first-name".into()))?,
            last_name: args
                .option("--last-name")
                .ok_or_else(|| Error::Usage("missing --last-name".into()))?,
            password_file: args.option("--password-file").map(PathBuf::from),
        },
        "logout" => Command::Logout,
        "whoami" => Command::Whoami,
        "update-profile" => {
            let update = ProfileUpdate {
                first_name: args.option("--first-name"),
                last_name: args.option("--last-name"),
            };
            if update == ProfileUpdate::default() {
                return Err(Error::Usage(
                    "update-profile needs --first-name or --last-name".into(),
                ));
            }
            Command::UpdateProfile(update)
        }
        "upload" => Command::Upload {
            file: PathBuf::from(args.positional(1, "resume file")?),
        },
        "resumes" => Command::Resumes {
            resume_id: args
                .positional
                .get(1)
                .map(|id| parse_id(id, "resume id"))
                .transpose()?,
        },
        "delete" => Command::Delete {
            resume_id: parse_id(&args.positional(1, "resume id")?, "resume id")?,
        },
        "analyze" => Command::Analyze {
            resume_id: parse_id(&args.positional(1, "resume id")?, "resume id")?,
            job_description_file: PathBuf::from(args.positional(2, "job description file")?),
            title: args.option("--title").unwrap_or_default(),
            company: args.option("--company").unwrap_or_default(),
            watch: args.switch("--watch"),
        },
        "status" => Command::Status {
            analysis_id: args.positional(1, "analysis id")?,
        },
        "watch" => Command::Watch {
            analysis_id: args.positional(1, "analysis id")?,
        },
        "checkout" => Command::Checkout {
            resume_id: parse_id(&args.positional(1, "resume id")?, "resume id")?,
        },
        other => return Err(Error::Usage(format!("unknown command: {other}"))),
    };

    Ok(Invocation {
        config_path: args.option("--config"),
        metrics: args.switch("--metrics"),
        command,
    })
}

/// Read a job description and enforce the server's minimum length.
fn read_job_description(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Usage(format!(
            "failed to read job description {}: {e}",
            path.display()
        ))
    })?;
    let text = text.trim().to_owned();
    let len = text.chars().count();
    if len < MIN_JOB_DESCRIPTION_CHARS {
        return Err(Error::JobDescriptionTooShort { len });
    }
    Ok(text)
}

/// Mime type for a resume file, from its extension.
fn resume_mime(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => Ok("application/pdf"),
        Some("docx") => {
            Ok("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        _ => Err(Error::UnsupportedResumeType(path.display().to_string())),
    }
}

/// Read a resume for upload: file name, mime type and content.
fn read_resume(path: &Path) -> Result<(String, &'static str, Vec<u8>)> {
    let mime = resume_mime(path)?;
    let read_error =
        |e: std::io::Error| Error::Usage(format!("failed to read {}: {e}", path.display()));
    let size = std::fs::metadata(path).map_err(read_error)?.len();
    if size > MAX_RESUME_BYTES {
        return Err(Error::ResumeTooLarge { size });
    }
    let content = std::fs::read(path).map_err(read_error)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resume".to_owned());
    Ok((file_name, mime, content))
}

/// Run `command` against `client`, printing results to stdout.
pub async fn run(command: Command, client: &Orchestrator, config: &Config) -> Result<()> {
    match command {
        Command::Login {
            email,
            password_file,
        } => {
            let password = resolve_password(password_file.as_deref())
                .map_err(|e| Error::Usage(e.to_string()))?;
            let auth = AuthApi::new(client.clone());
            auth.login(&email, &password)
                .await
                .map_err(|e| Error::api(&e, "Login failed."))?;
            let user = auth
                .me()
                .await
                .map_err(|e| Error::api(&e, "Failed to load profile."))?;
            println!("logged in as {}", user.email);
        }
        Command::Register {
            email,
            first_name,
            last_name,
            password_file,
        } => {
            let password = resolve_password(password_file.as_deref())
                .map_err(|e| Error::Usage(e.to_string()))?;
            AuthApi::new(client.clone())
                .register(&Registration {
                    email: email.clone(),
                    first_name,
                    last_name,
                    password,
                })
                .await
                .map_err(|e| Error::api(&e, "Registration failed."))?;
            println!("registered {email}, now run `resume-cli login {email}`");
        }
        Command::Logout => {
            AuthApi::new(client.clone()).logout();
            println!("logged out");
        }
        Command::Whoami => whoami(client).await?,
        Command::UpdateProfile(update) => {
            require_session(client)?;
            let user = AuthApi::new(client.clone())
                .update_me(&update)
                .await
                .map_err(|e| Error::api(&e, "Failed to update profile."))?;
            println!("profile updated: {} {}", user.first_name, user.last_name);
        }
        Command::Upload { file } => {
            require_session(client)?;
            let (file_name, mime, content) = read_resume(&file)?;
            let resume = ResumeApi::new(client.clone())
                .upload(&file_name, mime, content)
                .await
                .map_err(|e| Error::api(&e, "Upload failed."))?;
            info!(resume_id = resume.id, "resume uploaded");
            println!(
                "uploaded resume {}: {} ({} bytes)",
                resume.id, resume.original_filename, resume.file_size
            );
            if !resume.is_paid {
                println!("run `resume-cli checkout {}` to unlock analysis", resume.id);
            }
        }
        Command::Resumes {
            resume_id: Some(id),
        } => {
            require_session(client)?;
            let resume = ResumeApi::new(client.clone())
                .get(id)
                .await
                .map_err(|e| Error::api(&e, "Failed to load resume."))?;
            println!(
                "{} ({}, {} bytes)",
                resume.original_filename, resume.mime_type, resume.file_size
            );
            println!("uploaded: {}", resume.uploaded_at);
            println!("paid: {}", resume.is_paid);
            if let Some(url) = resume.download_url {
                println!("download: {url}");
            }
        }
        Command::Resumes { resume_id: None } => {
            require_session(client)?;
            let resumes = ResumeApi::new(client.clone())
                .list()
                .await
                .map_err(|e| Error::api(&e, "Failed to load resumes."))?;
            if resumes.is_empty() {
                println!("no resumes uploaded");
            }
            for resume in resumes {
                let paid = if resume.is_paid { "paid" } else { "unpaid" };
                println!(
                    "{:>6}  {:<40}  {:>8} bytes  {paid}  {}",
                    resume.id, resume.original_filename, resume.file_size, resume.uploaded_at
                );
            }
        }
        Command::Delete { resume_id } => {
            require_session(client)?;
            ResumeApi::new(client.clone())
                .delete(resume_id)
                .await
                .map_err(|e| Error::api(&e, "Failed to delete resume."))?;
            println!("deleted resume {resume_id}");
        }
        Command::Analyze {
            resume_id,
            job_description_file,
            title,
            company,
            watch,
        } => {
            require_session(client)?;
            let job_description = read_job_description(&job_description_file)?;
            let api = AnalysisApi::new(client.clone());
            let analysis = api
                .create(&NewAnalysis {
                    resume_id,
                    job_description,
                    job_title: title,
                    company,
                })
                .await
                .map_err(|e| Error::api(&e, "Failed to submit analysis."))?;
            info!(analysis_id = %analysis.id, "analysis submitted");
            println!("analysis {} submitted ({:?})", analysis.id, analysis.status);
            if watch {
                watch_analysis(&api, &analysis.id, config).await?;
            }
        }
        Command::Status { analysis_id } => {
            require_session(client)?;
            let analysis = AnalysisApi::new(client.clone())
                .get(&analysis_id)
                .await
                .map_err(|e| Error::api(&e, "Failed to load analysis."))?;
            print_analysis(&analysis);
        }
        Command::Watch { analysis_id } => {
            require_session(client)?;
            let api = AnalysisApi::new(client.clone());
            watch_analysis(&api, &analysis_id, config).await?;
        }
        Command::Checkout { resume_id } => {
            require_session(client)?;
            let url = PaymentApi::new(client.clone())
                .create_checkout(resume_id)
                .await
                .map_err(|e| Error::api(&e, "Payment initiation failed."))?;
            println!("complete payment at: {url}");
        }
    }
    Ok(())
}

fn require_session(client: &Orchestrator) -> Result<()> {
    if client.has_session() {
        Ok(())
    } else {
        Err(Error::NotLoggedIn)
    }
}

/// Show the current account. A stored session that cannot load the profile
/// is discarded.
async fn whoami(client: &Orchestrator) -> Result<()> {
    require_session(client)?;
    let auth = AuthApi::new(client.clone());
    match auth.me().await {
        Ok(user) => {
            let staff = if user.is_staff { ", staff" } else { "" };
            println!(
                "{} {} <{}> (id {}{staff})",
                user.first_name, user.last_name, user.email, user.id
            );
            println!("member since {}", user.date_joined);
            if let Some(profile) = user.profile {
                println!(
                    "plan: {}, credits remaining: {}",
                    profile.subscription_tier, profile.credits_remaining
                );
            }
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "stored session could not load profile, logging out");
            if client.has_session() {
                auth.logout();
            }
            Err(Error::api(&e, "Failed to load profile."))
        }
    }
}

fn print_analysis(analysis: &Analysis) {
    println!("analysis {}: {:?}", analysis.id, analysis.status);
    println!("created: {}", analysis.created_at);
    if let Some(completed) = &analysis.completed_at {
        println!("completed: {completed}");
    }
    if let Some(score) = analysis.match_score {
        println!("match score: {score}/100");
    }
    if let Some(probability) = analysis.hire_probability {
        println!("hire probability: {:.0}%", probability * 100.0);
    }
    for flag in &analysis.ats_flags {
        println!("ATS flag: {}", display_value(flag));
    }
    for bullet in &analysis.rewritten_bullets {
        println!("  - {}", display_value(bullet));
    }
    if !analysis.cover_letter.is_empty() {
        println!("\n{}", analysis.cover_letter);
    }
}

/// Strings print bare; anything else as compact JSON.
fn display_value(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_owned(),
        None => value.to_string(),
    }
}

/// Poll an analysis until it finishes; Ctrl-C stops watching.
async fn watch_analysis(api: &AnalysisApi, id: &str, config: &Config) -> Result<()> {
    let handle = api.wait_for(id, config.poll.interval(), config.poll.max_attempts);
    let canceller = handle.canceller();
    println!("waiting for analysis {id}...");

    tokio::select! {
        outcome = handle.wait() => {
            let analysis = outcome.map_err(|e| Error::api(&e, "Failed to load analysis."))?;
            print_analysis(&analysis);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            canceller.cancel();
            println!("stopped watching; resume with `resume-cli watch {id}`");
            Ok(())
        }
    }
}
