/// Padlock Cloud - server and administration commands
use clap::Parser;
use padlock_cloud::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = cli.server_config()?;
    padlock_cloud::logging::init(&config.logging)?;

    if matches!(cli.command, Command::Runserver(_)) {
        print_banner();
    }

    cli::run(cli, config).await
}

fn print_banner() {
    println!(
        r#"
    ____            ____           __      ________                __
   / __ \____ _____/ / /___  _____/ /__   / ____/ /___  __  ______/ /
  / /_/ / __ `/ __  / / __ \/ ___/ //_/  / /   / / __ \/ / / / __  /
 / ____/ /_/ / /_/ / / /_/ / /__/ ,<    / /___/ / /_/ / /_/ / /_/ /
/_/    \__,_/\__,_/_/\____/\___/_/|_|   \____/_/\____/\__,_/\__,_/

        Padlock Cloud v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
