use std::path::PathBuf;

use bw_core::config::BeatwireConfig;
use clap::Parser;

/// beatwire: real-time bass/treble, beat and BPM broadcaster.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fichier de configuration TOML. Défaut : config/beatwire.toml.
    #[arg(short, long, default_value = "config/beatwire.toml")]
    pub config: PathBuf,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Adresse d'écoute des abonnés (ex: 0.0.0.0:5343).
    #[arg(long)]
    pub bind: Option<String>,

    /// Nom du périphérique d'entrée. Défaut : entrée par défaut de l'hôte.
    #[arg(long)]
    pub device: Option<String>,

    /// Analyser un fichier audio au lieu du périphérique d'entrée.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Rejouer le fichier en boucle. Requiert --file.
    #[arg(long, default_value_t = false, requires = "file")]
    pub loop_file: bool,

    /// Afficher basses, aigus, beats et BPM dans le terminal.
    #[arg(long, default_value_t = false)]
    pub console: bool,

    /// Lister les périphériques d'entrée et quitter.
    #[arg(long, default_value_t = false)]
    pub list_devices: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut BeatwireConfig) {
        if let Some(ref bind) = self.bind {
            config.broadcast.bind.clone_from(bind);
        }
        if let Some(ref device) = self.device {
            config.capture.device = Some(device.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["beatwire"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/beatwire.toml"));
        assert_eq!(cli.log_level, "warn");
        assert!(cli.file.is_none());
        assert!(!cli.console);
    }

    #[test]
    fn overrides_replace_config_values() {
        let cli =
            Cli::try_parse_from(["beatwire", "--bind", "0.0.0.0:9000", "--device", "Line In"])
                .unwrap();
        let mut config = BeatwireConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.broadcast.bind, "0.0.0.0:9000");
        assert_eq!(config.capture.device.as_deref(), Some("Line In"));
    }

    #[test]
    fn loop_file_requires_file() {
        assert!(Cli::try_parse_from(["beatwire", "--loop-file"]).is_err());
        let cli = Cli::try_parse_from(["beatwire", "--file", "a.wav", "--loop-file"]).unwrap();
        assert!(cli.loop_file);
    }
}
