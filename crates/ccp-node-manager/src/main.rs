use anyhow::{Context, Result};
use ccp_node_manager::{commands, NodeManagerConfig};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("ccp")
        .version(ccp_node_manager::VERSION)
        .about("Cluster control plane: configuration checks and node manager settings")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Node manager settings (TOML)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("check")
                .about("Resolve the packages of a configuration against a feed snapshot")
                .arg(
                    Arg::new("configuration")
                        .long("configuration")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration document (JSON)"),
                )
                .arg(
                    Arg::new("feed")
                        .long("feed")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Package feed snapshot (JSON array of packages)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("compatible")
                .about("List earlier configurations whose node templates are unchanged")
                .arg(
                    Arg::new("configuration")
                        .long("configuration")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Checked configuration document (JSON)"),
                )
                .arg(
                    Arg::new("history")
                        .long("history")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Earlier configurations (JSON array)"),
                ),
        )
        .subcommand(Command::new("print-config").about("Print the effective node manager settings"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<NodeManagerConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => NodeManagerConfig::from_path(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(NodeManagerConfig::default()),
    }
}

fn required_path<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("missing --{name}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("check", args)) => {
            let configuration = commands::read_configuration(required_path(args, "configuration")?)?;
            let catalog = commands::read_feed(required_path(args, "feed")?)?;
            let report =
                commands::check(configuration, &catalog, &config.coordinator.supported_runtimes)
                    .await?;

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", commands::render_check(&report));
            }
            Ok(if report.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Some(("compatible", args)) => {
            let configuration = commands::read_configuration(required_path(args, "configuration")?)?;
            let history = commands::read_history(required_path(args, "history")?)?;
            for entry in commands::compatible(&configuration, &history) {
                println!("{} {}", entry.template_code, entry.compatible_configuration_id);
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("print-config", _)) => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}
