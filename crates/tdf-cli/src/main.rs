use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use tdf_cli::{presets_json, presets_text, resolve_config, run_simulation, SimulationConfig};
use tdf_core::{IntegrationMode, ModePreset};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn cli() -> Command {
    Command::new("tdf")
        .version(tdf_core::VERSION)
        .about("Task detection fallback chain tools")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("simulate")
                .about("Drive the chain with a seeded flaky detector")
                .arg(
                    Arg::new("queries")
                        .long("queries")
                        .default_value("500")
                        .value_parser(value_parser!(usize))
                        .help("Number of queries to issue"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability a detector call fails"),
                )
                .arg(
                    Arg::new("hang-rate")
                        .long("hang-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability a detector call never returns"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("preset")
                        .long("preset")
                        .default_value("conservative")
                        .value_parser(value_parser!(ModePreset))
                        .conflicts_with("config")
                        .help("Mode preset (conservative, balanced, aggressive)"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .default_value("active")
                        .value_parser(value_parser!(IntegrationMode))
                        .help("Integration mode (monitoring, shadow, active)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML config file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("presets")
                .about("Print the values of every mode preset")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a TOML config file")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Config file to check"),
                ),
        )
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tdf=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let preset = args
                .get_one::<ModePreset>("preset")
                .copied()
                .unwrap_or_default();
            let file = args.get_one::<PathBuf>("config");
            let config = SimulationConfig {
                queries: args.get_one::<usize>("queries").copied().unwrap_or(500),
                failure_rate: args.get_one::<f64>("failure-rate").copied().unwrap_or(0.1),
                hang_rate: args.get_one::<f64>("hang-rate").copied().unwrap_or(0.0),
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                mode: args
                    .get_one::<IntegrationMode>("mode")
                    .copied()
                    .unwrap_or_default(),
                chain: resolve_config(preset, file.map(PathBuf::as_path))?,
            };

            let report = run_simulation(config).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.generate_text());
            }
        }
        Some(("presets", args)) => {
            if args.get_flag("json") {
                println!("{}", presets_json()?);
            } else {
                print!("{}", presets_text());
            }
        }
        Some(("check-config", args)) => {
            let file = args
                .get_one::<PathBuf>("file")
                .context("missing config file argument")?;
            let config = resolve_config(ModePreset::default(), Some(file))?;
            println!("{}: OK (preset {})", file.display(), config.preset());
            print!("{}", toml::to_string_pretty(config.raw())?);
        }
        _ => {}
    }
    Ok(())
}
