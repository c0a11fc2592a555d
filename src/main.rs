use anyhow::{Context, Result};
use clap::Parser;
use demotype::engine::{PlaybackEngine, PlaybackState, Status};
use demotype::emitter::EnigoSink;
use demotype::hotkey::{GlobalHotkeys, HotkeyId};
use demotype::script::{Role, Script, Step};
use demotype::speed::SpeedPreset;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "demotype", about = "Type a scripted demo into the focused window, one hotkey press per step")]
struct Cli {
    /// TOML script file; omit to run a built-in sample
    script: Option<PathBuf>,

    /// Typing speed preset
    #[arg(long, value_enum, default_value = "fast")]
    speed: SpeedPreset,

    /// Global trigger key
    #[arg(long, value_enum, default_value = "f2")]
    hotkey: HotkeyId,

    /// Log engine internals to stderr
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let script = match &cli.script {
        Some(path) => load_script(path)?,
        None => sample_script(),
    };
    let total = script.len();
    eprintln!("[DEMO] script: {} ({} steps)", script.name, total);

    let sink = EnigoSink::new()?;
    let engine =
        PlaybackEngine::new(sink, Box::new(GlobalHotkeys::new())).with_verbose(cli.verbose);

    let (status_tx, status_rx) = flume::unbounded::<Status>();
    engine.set_observer(Box::new(move |status| {
        let _ = status_tx.send(status.clone());
    }));

    let ctrlc_engine = engine.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n[DEMO] interrupted");
        ctrlc_engine.stop();
    })
    .context("failed to install Ctrl+C handler")?;

    let report = engine.start(script, cli.speed, cli.hotkey)?;
    for warning in &report.warnings {
        eprintln!("[DEMO] warning: {}", warning);
    }
    println!(
        "Armed. Focus your target window and press {} to type each step (Ctrl+C stops).",
        cli.hotkey
    );

    let mut printed_warnings = 0;
    while let Ok(status) = status_rx.recv() {
        for warning in &status.warnings[printed_warnings..] {
            eprintln!("[DEMO] warning: {}", warning);
        }
        printed_warnings = status.warnings.len();

        match status.state {
            PlaybackState::Typing => {
                if let Some(idx) = status.step_index {
                    println!("Typing step {} of {}...", idx + 1, total);
                }
            }
            PlaybackState::Armed => {
                let key = status.hotkey.unwrap_or(cli.hotkey);
                match &status.next_preview {
                    Some(preview) => println!("Press {}  ->  {}", key, preview),
                    None => println!("Press {} to finish.", key),
                }
            }
            PlaybackState::Completed => {
                println!("Demo complete - all {} steps typed.", total);
                break;
            }
            PlaybackState::Stopped => {
                println!("Stopped.");
                break;
            }
            PlaybackState::Idle => {}
        }
    }

    engine.stop();
    Ok(())
}

fn load_script(path: &PathBuf) -> Result<Script> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse script {}", path.display()))
}

/// Short support-chat flow used when no script file is given.
fn sample_script() -> Script {
    Script::new(
        "Sample support chat",
        vec![
            Step::new(
                Role::Customer,
                "Hi, my order #1432 still shows as processing. Any update?",
                true,
                0.3,
            ),
            Step::new(
                Role::Agent,
                "Let me take a look at that for you right away.",
                true,
                0.3,
            ),
            Step::new(
                Role::Agent,
                "Good news: it shipped this morning. Tracking lands in your inbox within the hour.",
                true,
                0.3,
            ),
        ],
    )
}
