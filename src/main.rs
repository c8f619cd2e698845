use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use table_scraper::commands::{analyze, sites, status, watch};
use table_scraper::models::config::interval_from_secs;
use table_scraper::{ConfigManager, FileFrameSource, Result, ScraperConfig, ScraperError, ScraperManager};
use tracing::{debug, error, Level};

fn cli() -> Command {
    Command::new("table-scraper")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live poker table state read from a poker client window")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Config file (defaults to <config dir>/table-scraper/config.json)"),
        )
        .arg(
            Arg::new("site")
                .long("site")
                .value_name("NAME")
                .help("Site profile, overrides the config"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .action(ArgAction::SetTrue)
                .help("Log as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("analyze")
                .about("Capture once and print what was read")
                .arg(
                    Arg::new("image")
                        .long("image")
                        .value_name("PNG")
                        .value_parser(value_parser!(PathBuf))
                        .help("Analyze a saved screenshot instead of the screen"),
                )
                .arg(
                    Arg::new("debug-image")
                        .long("debug-image")
                        .value_name("PNG")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the frame annotated with the regions used"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Run the capture loop and print every published state")
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .value_name("N")
                        .value_parser(value_parser!(u64))
                        .help("Stop after N seconds (default: until Ctrl+C)"),
                )
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("S")
                        .value_parser(value_parser!(f64))
                        .help("Capture interval in seconds"),
                ),
        )
        .subcommand(Command::new("status").about("Print scraper status"))
        .subcommand(Command::new("sites").about("List known site profiles"))
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<ScraperConfig> {
    let manager = match matches.get_one::<PathBuf>("config") {
        Some(path) => ConfigManager::at(path),
        None => ConfigManager::new()?,
    };
    let mut config = manager.load()?;
    debug!(path = %manager.config_file_path().display(), site = %config.site, "config loaded");
    if let Some(site) = matches.get_one::<String>("site") {
        config.site = site.clone();
    }
    Ok(config)
}

async fn run(matches: ArgMatches) -> Result<()> {
    let config = load_config(&matches)?;
    let site = config.site.clone();

    match matches.subcommand() {
        Some(("analyze", sub)) => {
            let mut manager = ScraperManager::new(config);
            if let Some(image) = sub.get_one::<PathBuf>("image") {
                manager = manager.with_frame_source(Arc::new(FileFrameSource::new(image)));
            }
            manager.try_initialize(&site)?;

            let debug_image = sub.get_one::<PathBuf>("debug-image").map(PathBuf::as_path);
            let report = analyze::analyze(&manager, debug_image)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(("watch", sub)) => {
            let manager = ScraperManager::new(config);
            manager.try_initialize(&site)?;

            let interval = sub
                .get_one::<f64>("interval")
                .map(|secs| interval_from_secs(*secs))
                .transpose()
                .map_err(ScraperError::Config)?;
            let options = watch::WatchOptions {
                duration: sub.get_one::<u64>("seconds").map(|s| Duration::from_secs(*s)),
                interval,
            };
            let on_state = Arc::new(|state: &Value| println!("{}", state));
            watch::watch(&manager, options, on_state).await?;
        }
        Some(("status", _)) => {
            let manager = ScraperManager::new(config);
            // Status answers either way; initialization failures are logged
            manager.initialize(&site);
            println!("{}", status::status(&manager)?);
        }
        Some(("sites", _)) => {
            for summary in sites::sites(config.profiles_dir.as_deref())? {
                println!("{}", serde_json::to_string(&summary)?);
            }
        }
        _ => return Err(ScraperError::Config("no command given".to_string())),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"), matches.get_flag("json-logs"));

    match run(matches).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "table-scraper failed");
            ExitCode::FAILURE
        }
    }
}
