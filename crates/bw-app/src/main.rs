use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use bw_audio::capture::{self, CaptureSource, DeviceCapture, FileCapture};
use bw_core::clock::SystemClock;
use bw_core::config::BeatwireConfig;
use clap::Parser;

pub mod cli;
pub mod console;
pub mod session;

use session::{Session, SessionState};

/// Period of the main loop checking for Ctrl+C and capture events.
const POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = cli::Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn))
        .init();

    if cli.list_devices {
        for name in capture::list_input_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    // 3. Charger la config, puis les overrides CLI
    let mut config = resolve_config(&cli)?;
    cli.apply_overrides(&mut config);

    // 4. Choisir la source
    let source: Box<dyn CaptureSource> = match cli.file.as_deref() {
        Some(path) => Box::new(
            FileCapture::open(path, cli.loop_file)
                .with_context(|| format!("Lecture impossible : {}", path.display()))?,
        ),
        None => Box::new(DeviceCapture::new(config.capture.device.clone())),
    };

    // 5. Démarrer la session
    let mut session = Session::new(config, source);
    if cli.console {
        session.add_tap(
            console::ConsolePresenter::new(Arc::new(SystemClock)).into_tap(std::io::stdout()),
        );
    }
    session.start()?;
    if let Some(addr) = session.local_addr() {
        println!("beatwire @ ws://{addr}/ (Ctrl+C pour quitter)");
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::Relaxed))
            .context("Impossible d'installer le handler Ctrl+C")?;
    }

    // 6. Attendre Ctrl+C, la fin du fichier ou une panne de capture
    let outcome = loop {
        if interrupted.load(Ordering::Relaxed) {
            log::info!("Interruption demandée");
            break Ok(());
        }
        match session.wait_status(POLL) {
            Ok(SessionState::Running) => {}
            Ok(SessionState::Finished) => {
                log::info!("Fin de la source");
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    // 7. Arrêt propre : vidage de la file vers les abonnés
    if let Some(report) = session.stop() {
        log::info!(
            "{} résultats publiés, {} perdus, basses max {:.6}, aigus max {:.6}",
            report.published,
            report.dropped,
            report.pipeline.max_bass_level,
            report.pipeline.max_treble_level
        );
    }
    outcome
}

fn resolve_config(cli: &cli::Cli) -> Result<BeatwireConfig> {
    if cli.config.exists() {
        bw_core::config::load_config(&cli.config)
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            cli.config.display()
        );
        Ok(BeatwireConfig::default())
    }
}
