use churnwatch::cli::{run, Cli};
use churnwatch::logging::init_logging;
use clap::Parser;

fn main() -> std::process::ExitCode {
    init_logging();
    run(Cli::parse())
}
