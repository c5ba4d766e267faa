use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use sc_cli::{handle_shell_command, ShellCommand};
use sc_config::{load_from_path, SafetyCenterConfig, SafetyCenterFlags};
use sc_core::{
    Collaborators, DismissalStore, InMemoryStore, JsonFileStore, LoggingTransport,
    SafetyCenterService, StaticUserTopology,
};
use sc_model::{RefreshReason, UserId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn user_arg() -> Arg {
    Arg::new("user")
        .long("user")
        .default_value("0")
        .value_parser(value_parser!(UserId))
        .help("User whose profile group to use")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("safety-center")
        .version(sc_core::VERSION)
        .about("Safety center shell commands")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML file with flags and source groups"),
        )
        .arg(
            Arg::new("state")
                .long("state")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("JSON file holding dismissal state"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("enabled").about("Print whether the safety center is enabled"))
        .subcommand(Command::new("supported").about("Print whether the safety center is supported"))
        .subcommand(
            Command::new("refresh")
                .about("Start a refresh")
                .arg(
                    Arg::new("reason")
                        .long("reason")
                        .default_value("other")
                        .value_parser(value_parser!(RefreshReason))
                        .help("Refresh reason, by name or numeric value"),
                )
                .arg(user_arg()),
        )
        .subcommand(Command::new("clear-data").about("Clear all data and dismissals"))
        .subcommand(Command::new("package-name").about("Print the owning package name"))
        .subcommand(
            Command::new("status")
                .about("Print the aggregated view as JSON")
                .arg(user_arg()),
        );

    let matches = cli.get_matches();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if matches.get_flag("log-json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let (config, flags) = match matches.get_one::<PathBuf>("config") {
        Some(path) => load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => (SafetyCenterConfig::empty(), SafetyCenterFlags::default()),
    };
    let store: Arc<dyn DismissalStore> = match matches.get_one::<PathBuf>("state") {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(InMemoryStore::new()),
    };
    let collaborators = Collaborators::new(
        Arc::new(LoggingTransport),
        store,
        Arc::new(StaticUserTopology::single(UserId::SYSTEM)),
    );
    let service = SafetyCenterService::new(config, flags, collaborators)?;

    let command = match matches.subcommand() {
        Some(("enabled", _)) => ShellCommand::Enabled,
        Some(("supported", _)) => ShellCommand::Supported,
        Some(("refresh", args)) => ShellCommand::Refresh {
            reason: args
                .get_one::<RefreshReason>("reason")
                .copied()
                .unwrap_or(RefreshReason::Other),
            user: args.get_one::<UserId>("user").copied().unwrap_or(UserId::SYSTEM),
        },
        Some(("clear-data", _)) => ShellCommand::ClearData,
        Some(("package-name", _)) => ShellCommand::PackageName,
        Some(("status", args)) => ShellCommand::Status {
            user: args.get_one::<UserId>("user").copied().unwrap_or(UserId::SYSTEM),
        },
        _ => anyhow::bail!("unknown command"),
    };

    println!("{}", handle_shell_command(&service, command)?);
    service.flush()?;
    Ok(())
}
