// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use futures::StreamExt;
use log::{debug, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::{Path, PathBuf};

use tubeslides::app_config::{self, Config};
use tubeslides::captions::{normalize_file, segment::to_srt};
use tubeslides::{Admission, Controller, Job, JobStatus, PipelineError, StreamFrame};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// Output format of the `captions` command
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CaptionFormat {
    Json,
    Srt,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a video into a slide deck and follow its progress
    Submit {
        /// Video URL
        #[arg(value_name = "URL")]
        url: String,

        /// Download quality (best, 1080p, 720p, 480p)
        #[arg(short, long)]
        quality: Option<String>,

        /// Comma separated caption languages in preference order
        #[arg(short, long)]
        langs: Option<String>,

        /// Translate captions into this language
        #[arg(short, long)]
        translate: Option<String>,

        /// JPEG quality of slide images (1-95)
        #[arg(short, long)]
        image_quality: Option<u8>,

        /// Print only the final result
        #[arg(long)]
        quiet: bool,
    },

    /// List jobs, newest first
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show one job
    Show {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Delete a finished job and its files
    Delete {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Normalize a caption file (VTT or SRT) and print the segments
    Captions {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long, value_enum, default_value = "json")]
        format: CaptionFormat,
    },

    /// Generate shell completions for tubeslides
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// tubeslides - turn online videos into captioned slide decks
#[derive(Parser, Debug)]
#[command(name = "tubeslides")]
#[command(version)]
#[command(about = "Turn online videos into captioned slide decks")]
#[command(long_about = "tubeslides downloads a video, gathers or synthesizes its captions, \
optionally translates them and grabs one frame per caption to build a slide deck.

EXAMPLES:
    tubeslides submit https://youtu.be/abc123            # Convert with default settings
    tubeslides submit -t en -q 720p https://youtu.be/x   # Translate to English, 720p source
    tubeslides jobs --limit 5                             # Recent jobs
    tubeslides show 12                                    # One job as JSON
    tubeslides captions talk.vtt --format srt             # Normalize a caption file
    tubeslides completions bash > tubeslides.bash         # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't exist,
    a default one is created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "conf.json")]
    config: PathBuf,

    /// Set logging level
    #[arg(long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation, filtered by the global max level
struct CustomLogger;

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color and tag for a level
    fn style(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("1;31", "✗"),
            Level::Warn => ("1;33", "!"),
            Level::Info => ("1;32", " "),
            Level::Debug => ("1;36", "·"),
            Level::Trace => ("1;35", "…"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = chrono::Local::now().format("%H:%M:%S.%3f");
        let (color, tag) = Self::style(record.level());
        let _ = writeln!(
            std::io::stderr(),
            "\x1B[{}m{} {} {}\x1B[0m",
            color,
            now,
            tag,
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info until the config has been read
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    if let Some(level) = cli.log_level {
        log::set_max_level(app_config::LogLevel::from(level).to_level_filter());
    }

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "tubeslides", &mut std::io::stdout());
            Ok(())
        }
        Commands::Captions { file, format } => print_captions(file, format),
        command => {
            let config = load_config(&cli.config, cli.log_level)?;
            let controller = Controller::start(config).await?;
            let result = run_command(&controller, command).await;
            controller.shutdown().await;
            result
        }
    }
}

fn load_config(path: &Path, cli_level: Option<CliLogLevel>) -> Result<Config> {
    let (mut config, created) = Config::load_or_create(path)?;
    if created {
        warn!("Config file not found at '{}', created a default one.", path.display());
    }

    match cli_level {
        Some(level) => config.log_level = level.into(),
        None => log::set_max_level(config.log_level.to_level_filter()),
    }
    Ok(config)
}

async fn run_command(controller: &Controller, command: Commands) -> Result<()> {
    match command {
        Commands::Submit {
            url,
            quality,
            langs,
            translate,
            image_quality,
            quiet,
        } => {
            let mut job_config = controller.default_job_config();
            if let Some(quality) = quality {
                job_config.video_quality = quality;
            }
            if let Some(langs) = langs {
                job_config.subtitle_langs = langs;
            }
            if let Some(target) = translate {
                job_config.translate_target = target;
            }
            if let Some(image_quality) = image_quality {
                job_config.image_quality = image_quality;
            }

            match controller.submit(&url, job_config).await? {
                Admission::Cached(job) => {
                    info!("{} was already converted by job {}", job.url, job.id);
                    print_job(&job);
                    Ok(())
                }
                Admission::Overloaded { active, ceiling } => {
                    Err(PipelineError::Overloaded { active, ceiling }.into())
                }
                Admission::Accepted(job) => {
                    info!("Job {} accepted", job.id);
                    follow(controller, job.id, quiet).await
                }
            }
        }
        Commands::Jobs { limit, offset } => {
            let jobs = controller.list_jobs(limit, offset).await?;
            if jobs.is_empty() {
                println!("No jobs");
            }
            for job in jobs {
                println!(
                    "{:>5}  {:<22} {:>3}%  {}",
                    job.id,
                    job.status,
                    job.progress,
                    job.title.as_deref().unwrap_or(&job.url)
                );
            }
            println!("{}", controller.stats().await?);
            Ok(())
        }
        Commands::Show { id } => {
            let job = controller.job(id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Commands::Delete { id } => {
            controller.delete_job(id).await?;
            println!("Deleted job {}", id);
            Ok(())
        }
        Commands::Captions { .. } | Commands::Completions { .. } => Ok(()),
    }
}

/// Print events until the job ends; Ctrl-C cancels it
async fn follow(controller: &Controller, job_id: i64, quiet: bool) -> Result<()> {
    let mut events = controller.stream(job_id).await?;

    loop {
        tokio::select! {
            frame = events.next() => match frame {
                Some(StreamFrame::Event(event)) => {
                    if !quiet {
                        println!("[{:>3}%] {:<22} {}", event.progress, event.status, event.message);
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Some(StreamFrame::Heartbeat) => debug!("Job {} still working", job_id),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling job {}", job_id);
                controller.cancel(job_id).await?;
                break;
            }
        }
    }

    let job = controller.job(job_id).await?;
    print_job(&job);
    match job.status {
        JobStatus::Failed => Err(anyhow!(
            "job {} failed: {}",
            job.id,
            job.error.as_deref().unwrap_or(&job.message)
        )),
        _ => Ok(()),
    }
}

fn print_job(job: &Job) {
    println!("Job {}: {} ({}%)", job.id, job.status, job.progress);
    if let Some(title) = &job.title {
        println!("  title:  {}", title);
    }
    println!("  url:    {}", job.url);
    if let Some(count) = job.slide_count {
        println!("  slides: {}", count);
    }
    if let Some(path) = &job.output_path {
        println!("  output: {}", path);
    }
    if let Some(error) = &job.error {
        println!("  error:  {}", error);
    }
}

fn print_captions(file: PathBuf, format: CaptionFormat) -> Result<()> {
    let segments = normalize_file(&file)?;
    match format {
        CaptionFormat::Json => println!("{}", serde_json::to_string_pretty(&segments)?),
        CaptionFormat::Srt => print!("{}", to_srt(&segments)),
    }
    Ok(())
}
