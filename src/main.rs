use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hidscript::{Config, GadgetController, Profile, RunOutcome, parse_file, preprocess};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "hidscript",
    about = "Drive a USB HID gadget with DuckyScript",
    version
)]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Probe the host, restore an active gadget and print the status
    Status,
    /// Provision and bind a gadget from a profile JSON file
    Activate { profile: PathBuf },
    /// Unbind and remove the active gadget
    Deactivate,
    /// Unbind every gadget, whatever the recorded state
    PanicStop,
    /// Run a script, streaming execution events as JSON lines
    Run {
        script: PathBuf,
        /// Delay multiplier
        #[arg(short, long, default_value_t = 1.0)]
        multiplier: f64,
        /// Execution id to report in events
        #[arg(long)]
        id: Option<String>,
    },
    /// Print the estimated run time of a script in milliseconds
    Estimate {
        script: PathBuf,
        #[arg(short, long, default_value_t = 1.0)]
        multiplier: f64,
    },
    /// Print the preprocessed command list
    Parse { script: PathBuf },
    /// Send test input through the active gadget
    #[command(subcommand)]
    Test(TestCmd),
}

#[derive(Subcommand, Debug)]
enum TestCmd {
    /// Move the pointer
    Mouse {
        #[arg(allow_negative_numbers = true)]
        dx: i32,
        #[arg(allow_negative_numbers = true)]
        dy: i32,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        wheel: i32,
        #[arg(long, default_value_t = 0)]
        buttons: u8,
    },
    /// Tap a named key, or type the label as text
    Key { label: String },
    /// Send Ctrl+Alt+Delete
    CtrlAltDel,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Parsing needs neither config nor root.
    if let Cmd::Parse { script } = &args.command {
        let commands = parse_file(script)
            .with_context(|| format!("Failed to parse script file: {}", script.display()))?;
        let program = preprocess(commands);
        for cmd in &program.commands {
            println!("{:>4}  {:<14} {}", cmd.line, cmd.kind.keyword(), cmd.args.join(" | "));
        }
        let mut names: Vec<_> = program.functions.keys().collect();
        names.sort();
        for name in names {
            println!("function {name}");
        }
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let gadget = GadgetController::new(config);

    match args.command {
        Cmd::Parse { .. } => {}
        Cmd::Status => {
            let status = gadget.refresh_status(true).await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Cmd::Activate { profile } => {
            let text = std::fs::read_to_string(&profile)
                .with_context(|| format!("Failed to read profile: {}", profile.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse profile: {}", profile.display()))?;
            let profile = Profile::from_json(&value)?;
            gadget.refresh_status(true).await;
            gadget.activate(&profile).await?;
            println!("{}", serde_json::to_string_pretty(&gadget.status())?);
        }
        Cmd::Deactivate => {
            gadget.refresh_status(true).await;
            gadget.deactivate().await?;
        }
        Cmd::PanicStop => gadget.panic_stop().await,
        Cmd::Run {
            script,
            multiplier,
            id,
        } => {
            let text = read_script(&script)?;
            gadget.refresh_status(true).await;
            run_script(&gadget, &text, multiplier, id.as_deref()).await?;
        }
        Cmd::Estimate { script, multiplier } => {
            let text = read_script(&script)?;
            let ms = gadget
                .estimate_ducky_script_duration_ms(&text, multiplier)
                .await?;
            println!("{ms}");
        }
        Cmd::Test(test) => {
            gadget.refresh_status(true).await;
            match test {
                TestCmd::Mouse {
                    dx,
                    dy,
                    wheel,
                    buttons,
                } => gadget.test_mouse_move(dx, dy, wheel, buttons).await?,
                TestCmd::Key { label } => gadget.test_keyboard_key(&label).await?,
                TestCmd::CtrlAltDel => gadget.test_ctrl_alt_del().await?,
            }
        }
    }
    Ok(())
}

async fn run_script(gadget: &GadgetController, text: &str, multiplier: f64, id: Option<&str>) -> Result<()> {
    let mut events = gadget.subscribe_events();
    let mut run = gadget.execute_ducky_script(text, multiplier, id);
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{line}");
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = loop {
        tokio::select! {
            joined = &mut run.task => break joined.context("Script task panicked")?,
            _ = tokio::signal::ctrl_c() => gadget.cancel_execution(Some(&run.id)),
        }
    };
    let _ = printer.await;

    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Cancelled => bail!("Execution {} cancelled", run.id),
        RunOutcome::Failed(err) => Err(err).context(format!("Execution {} failed", run.id)),
    }
}
