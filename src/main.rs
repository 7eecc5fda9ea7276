//! Nudel CLI - play pattern files on a virtual scheduler

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use nudel::config::SessionConfig;
use nudel::document::{DocumentId, MAX_DOCUMENTS};
use nudel::eval::{EvalScope, EvalState, PatternRuntime, ReturnValue};
use nudel::observer::LogObserver;
use nudel::pattern::{Hap, Value};
use nudel::runtime::LineRuntime;
use nudel::scheduler::{SchedulerAdapter, TriggerTiming, VirtualCyclist};
use nudel::session::{Session, SessionHandle};

/// How often the player advances the scheduler clock.
const CLOCK_TICK: Duration = Duration::from_millis(10);

/// How often watched files are checked for changes.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "nudel")]
#[command(about = "Nudel: live pattern session runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play pattern files, one document each, reloading them on change
    Play {
        /// Pattern files (at most 8)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Session config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop after this many cycles (default: play until Ctrl+C)
        #[arg(long)]
        cycles: Option<f64>,

        /// Tempo in cycles per second (overrides the config)
        #[arg(long)]
        cps: Option<f64>,

        /// Do not log highlighted events
        #[arg(long)]
        no_highlights: bool,
    },

    /// Evaluate a file once and print what it binds
    Check {
        file: PathBuf,
    },

    /// Print the default config
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            files,
            config,
            cycles,
            cps,
            no_highlights,
        } => {
            let mut config = match config {
                Some(path) => SessionConfig::load(&path)?,
                None => SessionConfig::default(),
            };
            if let Some(cps) = cps {
                config.scheduler.cps = cps;
            }
            if no_highlights {
                config.highlight.enabled = false;
            }
            config.validate()?;
            play(files, config, cycles).await?;
        }

        Commands::Check { file } => {
            check(&file).await?;
        }

        Commands::Config => {
            print!("{}", SessionConfig::default().to_toml()?);
        }
    }

    Ok(())
}

struct WatchedFile {
    path: PathBuf,
    doc: DocumentId,
    modified: Option<SystemTime>,
}

impl WatchedFile {
    /// True if the file changed since it was last seen.
    fn poll(&mut self) -> bool {
        let modified = modified_time(&self.path);
        if modified.is_some() && modified != self.modified {
            self.modified = modified;
            true
        } else {
            false
        }
    }

    async fn load(&self, session: &SessionHandle) -> Result<(), Box<dyn std::error::Error>> {
        let code = match fs::read_to_string(&self.path) {
            Ok(code) => code,
            Err(e) => {
                warn!(doc = %self.doc, "cannot read {}: {}", self.path.display(), e);
                return Ok(());
            }
        };
        if session.evaluate(self.doc, code, false).await? {
            info!(doc = %self.doc, "loaded {}", self.path.display());
        }
        Ok(())
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

async fn play(
    files: Vec<PathBuf>,
    config: SessionConfig,
    cycles: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if files.len() > MAX_DOCUMENTS as usize {
        return Err(format!("at most {} files can be played at once", MAX_DOCUMENTS).into());
    }

    let cyclist = Arc::new(VirtualCyclist::new(
        config.scheduler.cps,
        Arc::new(|hap: &Hap<Value>, timing: TriggerTiming| {
            info!(
                onset = timing.onset,
                deadline = timing.deadline,
                duration = timing.duration,
                "trigger {}",
                hap.value
            );
        }),
    ));
    let scheduler = Arc::new(SchedulerAdapter::new(cyclist.clone()));
    let session = Session::new(
        config.session.clone(),
        Arc::new(LineRuntime),
        scheduler,
        Arc::new(LogObserver),
        Arc::new(LogObserver),
    );
    let highlight = session
        .highlight_loop()
        .with_max_window(config.highlight.max_window)
        .spawn(config.highlight.frame_rate, config.highlight.enabled);
    let (handle, task) = session.spawn();

    let mut watched = Vec::with_capacity(files.len());
    for (slot, path) in (1..=MAX_DOCUMENTS).zip(files) {
        watched.push(WatchedFile {
            doc: DocumentId::new(slot)?,
            modified: None,
            path,
        });
    }
    for file in &mut watched {
        file.poll();
        file.load(&handle).await?;
    }

    info!(cps = config.scheduler.cps, "playing {} document(s), Ctrl+C to stop", watched.len());
    cyclist.start();

    let mut clock = tokio::time::interval(CLOCK_TICK);
    let mut last_tick = Instant::now();
    let mut last_watch = Instant::now();
    let stop = tokio::signal::ctrl_c();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => {
                info!("interrupted");
                break;
            }
            _ = clock.tick() => {
                let now = Instant::now();
                cyclist.advance(now.duration_since(last_tick).as_secs_f64());
                last_tick = now;

                if cycles.is_some_and(|cycles| handle.scheduler().now() >= cycles) {
                    info!("played {} cycles", handle.scheduler().now());
                    break;
                }

                if now.duration_since(last_watch) >= WATCH_INTERVAL {
                    last_watch = now;
                    for file in &mut watched {
                        if file.poll() {
                            info!(doc = %file.doc, "{} changed, reloading", file.path.display());
                            file.load(&handle).await?;
                        }
                    }
                }
            }
        }
    }

    cyclist.stop();
    highlight.shutdown().await;
    handle.shutdown().await?;
    task.await?;
    Ok(())
}

async fn check(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let code = fs::read_to_string(file)?;
    let scheduler = SchedulerAdapter::new(Arc::new(VirtualCyclist::silent(
        nudel::scheduler::DEFAULT_CPS,
    )));
    let mut state = EvalState::default();
    let doc = DocumentId::new(1)?;

    let evaluated = {
        let mut scope = EvalScope::new(doc, &mut state, &scheduler);
        LineRuntime.evaluate(&code, &mut scope).await?
    };

    println!("{}: ok", file.display());
    for name in state.bindings.names() {
        println!("  {}", name);
    }
    match evaluated.result {
        ReturnValue::Pattern(_) => println!("  result: pattern"),
        ReturnValue::Value(value) => println!("  result: {}", value),
        ReturnValue::Undefined => {}
    }
    if state.transform().is_some() {
        println!("  global transform registered");
    }
    println!("  tempo: {} cps", scheduler.cps());
    Ok(())
}
