//! Nearby Map simulator CLI

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use nearby_map::WidgetConfig;
use tracing_subscriber::{fmt, EnvFilter};

mod simulator;

use simulator::{run_concurrent, run_simulator, SimulatorConfig};

fn cli() -> Command {
    Command::new("nearby-sim")
        .version(nearby_map::VERSION)
        .about("Nearby Map widget simulator over a headless map SDK")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .help("TOML configuration file (defaults to the environment)"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Mount one widget, click every marker and toggle the gate")
                .arg(
                    Arg::new("users")
                        .long("users")
                        .default_value("20")
                        .value_parser(value_parser!(usize))
                        .help("Number of mock users in the roster"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("toggles")
                        .long("toggles")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of off/on cycles of the visibility gate"),
                )
                .arg(
                    Arg::new("api-key")
                        .long("api-key")
                        .help("Maps API key, overriding the configuration"),
                ),
        )
        .subcommand(
            Command::new("concurrent")
                .about("Mount several widgets at once on a shared script loader")
                .arg(
                    Arg::new("widgets")
                        .long("widgets")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Number of widgets to mount"),
                )
                .arg(
                    Arg::new("api-key")
                        .long("api-key")
                        .help("Maps API key, overriding the configuration"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the resolved configuration")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn load_config(args: &ArgMatches) -> anyhow::Result<WidgetConfig> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => WidgetConfig::from_file(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => WidgetConfig::from_env().context("reading configuration from environment")?,
    };
    if let Ok(Some(key)) = args.try_get_one::<String>("api-key") {
        config = config.with_api_key(key.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                users: args.get_one::<usize>("users").copied().unwrap_or(20),
                toggles: args.get_one::<usize>("toggles").copied().unwrap_or(3),
                widget: load_config(args)?,
            };

            println!("Running Nearby Map simulator...");
            println!("Users: {}", config.users);
            println!("Seed: {}", config.seed);
            println!("Toggles: {}", config.toggles);
            println!();

            let report = run_simulator(config).await?;
            println!("{}", report.generate_text());

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("concurrent", args)) => {
            let widgets = args.get_one::<usize>("widgets").copied().unwrap_or(8);
            let config = load_config(args)?;

            let report = run_concurrent(&config, widgets).await?;
            println!("Concurrent Mount Report:");
            println!("  Widgets: {}", report.widgets);
            println!("  Ready: {}", report.ready);
            println!("  Script Fetches: {}", report.script_fetches);
            println!("  Status: {}", if report.passed() { "PASSED" } else { "FAILED" });

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_config(args)?.redacted();
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        _ => {
            cli().print_help()?;
        }
    }

    Ok(())
}
