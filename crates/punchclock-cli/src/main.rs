use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use punchclock_core::{identifier, qr, Method, PunchType, Transition, Verdict};
use punchclock_device::load_sample;
use punchclock_service::{AttendanceService, Config};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

const EXIT_REJECTED: u8 = 2;
const EXIT_CANCELLED: u8 = 3;

#[derive(Parser)]
#[command(name = "punchclock", about = "Attendance check-in / check-out")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face used for face punches on this device
    Enroll {
        /// Name shown on face punches
        #[arg(short, long)]
        name: String,
        /// Image file holding the reference face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Remove the enrolled identity
    Reset,
    /// Show the enrolled identity
    Whoami,
    /// Check an identity number's check character
    Validate {
        /// Identity number, e.g. 12.345.678-5
        id: String,
    },
    /// Extract an identity number from scanned text
    Parse {
        /// Raw scan payload
        text: String,
    },
    /// Record one punch
    #[command(group(ArgGroup::new("input").required(true).args(["manual", "qr", "face"])))]
    Punch {
        /// in | out
        direction: PunchType,
        /// No verification
        #[arg(long)]
        manual: bool,
        /// Raw scan payload from the identity card
        #[arg(long)]
        qr: Option<String>,
        /// Image file of the captured face
        #[arg(long)]
        face: Option<PathBuf>,
        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read scans (qr) or image paths (face) from stdin until a punch is accepted
    Kiosk {
        /// in | out
        direction: PunchType,
        /// qr | face
        #[arg(short, long, default_value = "qr")]
        method: Method,
        /// Print verdicts as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { id } => Ok(validate(&id)),
        Commands::Parse { text } => Ok(parse(&text)),
        command => {
            let config = Config::from_env();
            tracing::debug!(db = %config.db_path.display(), "loading service");
            let service = AttendanceService::from_config(&config)?;
            run(&service, command).await
        }
    }
}

async fn run(service: &AttendanceService, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Enroll { name, image } => {
            let sample = load_sample(&image)
                .with_context(|| format!("reading reference face {}", image.display()))?;
            let identity = service.enroll(&sample, &name)?;
            println!("enrolled {} ({})", identity.display_name, identity.id);
        }
        Commands::Reset => {
            service.reset()?;
            println!("enrollment cleared");
        }
        Commands::Whoami => match service.active_identity() {
            Some(identity) => println!(
                "{} ({}), enrolled {}",
                identity.display_name,
                identity.id,
                identity.enrolled_at.to_rfc3339()
            ),
            None => println!("not enrolled"),
        },
        Commands::Punch {
            direction,
            manual,
            qr,
            face,
            json,
        } => {
            let method = if manual {
                Method::Manual
            } else if qr.is_some() {
                Method::Qr
            } else {
                Method::Face
            };

            let verdict = match service.begin(direction, method).await? {
                None => None,
                Some(Transition::Decided(verdict)) => Some(verdict),
                Some(Transition::AwaitingInput(_)) => match (qr, face) {
                    (Some(payload), _) => Some(service.submit_qr(&payload)?),
                    (None, Some(path)) => {
                        let sample = match load_sample(&path) {
                            Ok(sample) => sample,
                            Err(e) => {
                                service.cancel();
                                return Err(e).with_context(|| {
                                    format!("reading captured face {}", path.display())
                                });
                            }
                        };
                        service.submit_face(sample).await?
                    }
                    (None, None) => None,
                },
            };
            service.acknowledge();
            return Ok(match verdict {
                Some(v) => report(&v, json)?,
                None => {
                    println!("cancelled");
                    ExitCode::from(EXIT_CANCELLED)
                }
            });
        }
        Commands::Kiosk {
            direction,
            method,
            json,
        } => return kiosk(service, direction, method, json).await,
        Commands::Validate { id } => return Ok(validate(&id)),
        Commands::Parse { text } => return Ok(parse(&text)),
    }
    Ok(ExitCode::SUCCESS)
}

/// Drive one attempt from stdin lines: each line is a scan payload (qr) or
/// an image path (face). `cancel` or end of input abandons the attempt.
async fn kiosk(
    service: &AttendanceService,
    direction: PunchType,
    method: Method,
    json: bool,
) -> Result<ExitCode> {
    match service.begin(direction, method).await? {
        None => {
            println!("cancelled");
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }
        Some(Transition::Decided(verdict)) => {
            service.acknowledge();
            return report(&verdict, json);
        }
        Some(Transition::AwaitingInput(_)) => {}
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprintln!("waiting for {method} input (\"cancel\" to abort)");
        let Some(line) = lines.next_line().await? else {
            service.cancel();
            println!("cancelled");
            return Ok(ExitCode::from(EXIT_CANCELLED));
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("cancel") {
            service.cancel();
            println!("cancelled");
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }

        let verdict = match method {
            Method::Face => match load_sample(line) {
                Ok(sample) => service.submit_face(sample).await?,
                Err(e) => {
                    eprintln!("capture unusable: {e}");
                    continue;
                }
            },
            _ => Some(service.submit_qr(line)?),
        };
        let Some(verdict) = verdict else {
            println!("cancelled");
            return Ok(ExitCode::from(EXIT_CANCELLED));
        };

        match verdict.reason() {
            Some(reason) if reason.is_retryable() => {
                report(&verdict, json)?;
                service.retry()?;
            }
            _ => {
                service.acknowledge();
                return report(&verdict, json);
            }
        }
    }
}

fn report(verdict: &Verdict, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(verdict)?);
    } else {
        match verdict {
            Verdict::Accepted { record } => println!("accepted\n{}", record.summary()),
            Verdict::Rejected { reason } => println!("rejected: {reason}"),
        }
    }
    Ok(if verdict.is_accepted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REJECTED)
    })
}

fn parse(text: &str) -> ExitCode {
    match qr::parse(text) {
        Some(found) => {
            println!("{found}");
            ExitCode::SUCCESS
        }
        None => {
            println!("no identity number found");
            ExitCode::from(EXIT_REJECTED)
        }
    }
}

fn validate(id: &str) -> ExitCode {
    if let Some(canonical) = identifier::normalize(id) {
        println!("valid: {canonical}");
        return ExitCode::SUCCESS;
    }

    let digits: String = id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let body = digits.get(..digits.len().saturating_sub(1)).unwrap_or("");
    match identifier::check_character(body) {
        Some(expected) => println!("invalid: expected check character {expected}"),
        None => println!("invalid: not an identity number"),
    }
    ExitCode::from(EXIT_REJECTED)
}
