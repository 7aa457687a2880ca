use keypool_kms::{cli::Command, config::Config};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    keypool_kms::init_tracing()?;

    let command = match Command::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let config = Config::load()?;

    keypool_kms::run()
        .config(config)
        .command(command)
        .start()
        .await
}
