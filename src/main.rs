use clap::Parser;

use dxsync::config::Settings;
use dxsync::{SyncError, cli, daemon, logging};

fn main() {
    let cli = cli::Cli::parse();

    let config_path = match cli.config.clone().or_else(Settings::default_path) {
        Some(path) => path,
        None => {
            eprintln!("dxsync: cannot determine the home directory; pass --config");
            std::process::exit(1);
        }
    };
    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("dxsync: {:#}", e);
            std::process::exit(1);
        }
    };

    let _guard = logging::init(&settings.workdir, cli.verbose);

    let result = match cli.command {
        Some(cli::Commands::Check {}) => daemon::check(&settings),
        None => daemon::run(&settings),
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("dxsync: {:#}", e);
        let code = e.downcast_ref::<SyncError>().map(|s| s.exit_code()).unwrap_or(1);
        std::process::exit(code);
    }
}
