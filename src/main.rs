use clap::Parser;
use mbindex::cmd::{self, Cli, Command};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        Command::Update(args) => cmd::update::run(args),
        Command::Status(args) => cmd::status::run(args),
        Command::Init(args) => cmd::init::run(args),
    }
}

/// RUST_LOG wins over --log and --verbose.
fn init_logging(cli: &Cli) {
    let fallback = if cli.verbose { "debug" } else { cli.log.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
