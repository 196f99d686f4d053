use clap::Parser;

use airwave::cli::{self, Cli};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(err) = cli::run(cli).await {
        log::error!("{:#}", err);
        std::process::exit(1);
    }
}
