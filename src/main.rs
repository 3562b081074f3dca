use clap::Parser;
use tracing_subscriber::EnvFilter;

use seispick::cli::{self, Args};

fn main() {
    let args = Args::parse();

    // RUST_LOG takes precedence over the default verbosity
    let default_filter = match args.quiet() {
        true => "seispick=warn",
        false => "seispick=info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(cli::main(args));
}
