use clap::Parser;
use divertsuite::cli::Cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    std::process::exit(divertsuite::cli::run(cli));
}
