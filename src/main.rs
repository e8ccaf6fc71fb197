use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use archive_feed::RunOptions;

const HELP: &str = "archive-feed - Browse an archived timeline from the terminal.

  --version, -V        Show version and exit
  --help,    -h        Show this help message
  --page N             Open the feed at page N
  --offline            Browse the built-in sample archive
  --dump               Print the page as JSON instead of opening the viewer
  --config PATH        Read configuration from PATH";

enum Cli {
    Exit,
    Run(RunOptions),
}

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(Cli::Exit) => return,
        Ok(Cli::Run(options)) => options,
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = archive_feed::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Cli> {
    let mut options = RunOptions::default();
    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("archive-feed {}", archive_feed::VERSION);
                return Ok(Cli::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Cli::Exit);
            }
            "--offline" => options.offline = true,
            "--dump" => options.dump = true,
            "--page" => {
                let value = args.next().ok_or_else(|| anyhow!("--page needs a value"))?;
                options.page = Some(value);
            }
            "--config" => {
                let value = args.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                options.config_file = Some(PathBuf::from(value));
            }
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(Cli::Run(options))
}
