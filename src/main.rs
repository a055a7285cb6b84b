mod assets;
mod config;
mod extract;
mod kml;
mod manifest;
mod metadata;
mod pipeline;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use config::{Config, ShapeMode};
use pipeline::BatchOutcome;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status when the input directory holds no KML at all.
const EXIT_NO_INPUT: u8 = 2;

fn cli() -> Command {
    Command::new("kml2leaflet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Converts RF coverage KML exports into Leaflet overlay manifests")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("DIR")
                .help("Folder containing KML files [default: .]")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("out")
                .short('o')
                .long("out")
                .value_name("DIR")
                .help("Output folder [default: out]")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECS")
                .help("Download timeout in seconds [default: 120]")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("skip-downloads")
                .long("skip-downloads")
                .help("Do not fetch or copy PNGs; still writes manifests")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("shape")
                .long("shape")
                .value_name("SHAPE")
                .help("KML document shape [default: original]")
                .value_parser(["original", "alternate", "auto"]),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON config file; flags given on the command line win")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

/// Config file (if any) first, then explicit flags on top.
fn build_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(input) = matches.get_one::<PathBuf>("input") {
        config.input_dir = input.clone();
    }
    if let Some(out) = matches.get_one::<PathBuf>("out") {
        config.output_dir = out.clone();
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_secs = *timeout;
    }
    if matches.get_flag("skip-downloads") {
        config.skip_downloads = true;
    }
    if let Some(shape) = matches.get_one::<String>("shape") {
        config.shape = shape.parse::<ShapeMode>()?;
    }
    Ok(config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let matches = cli().get_matches();
    let config = build_config(&matches).context("Failed to load configuration")?;

    tracing::info!(
        input = %config.input_dir.display(),
        output = %config.output_dir.display(),
        shape = %config.shape,
        skip_downloads = config.skip_downloads,
        "kml2leaflet starting"
    );

    match pipeline::run(&config).await? {
        BatchOutcome::NoDocuments => Ok(ExitCode::from(EXIT_NO_INPUT)),
        BatchOutcome::Completed(report) => {
            tracing::info!(
                documents = report.documents,
                written = report.index.manifests.len(),
                failed = report.failed.len(),
                "Done"
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let matches = cli().try_get_matches_from(["kml2leaflet"]).unwrap();
        let config = build_config(&matches).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_flags_override() {
        let matches = cli()
            .try_get_matches_from([
                "kml2leaflet",
                "-i",
                "kml",
                "--out",
                "public",
                "--timeout",
                "15",
                "--skip-downloads",
                "--shape",
                "auto",
            ])
            .unwrap();
        let config = build_config(&matches).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("kml"));
        assert_eq!(config.output_dir, PathBuf::from("public"));
        assert_eq!(config.timeout_secs, 15);
        assert!(config.skip_downloads);
        assert_eq!(config.shape, ShapeMode::Auto);
    }

    #[test]
    fn test_cli_flags_beat_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k2l.json");
        std::fs::write(&path, r#"{ "timeout_secs": 30, "base_segment": "coverage" }"#).unwrap();

        let matches = cli()
            .try_get_matches_from(["kml2leaflet", "--config", path.to_str().unwrap(), "--timeout", "5"])
            .unwrap();
        let config = build_config(&matches).unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.base_segment, "coverage");
    }

    #[test]
    fn test_cli_rejects_unknown_shape() {
        assert!(cli().try_get_matches_from(["kml2leaflet", "--shape", "kmz"]).is_err());
    }
}
