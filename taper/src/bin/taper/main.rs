// vim: tw=80
use std::{path::PathBuf, process::exit};

use clap::{crate_version, Parser};
use taper_core::{
    config::Config,
    taper::Taper,
    tapelist::{TapeList, UNUSED},
    Result,
};
use tokio::io::{self, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
/// Write files to tape as directed by commands on stdin.
///
/// Replies are written to stdout, and diagnostics to stderr.
struct Run {
    /// Configuration file
    #[clap(short, long)]
    config: PathBuf,
}

impl Run {
    async fn main(self) -> Result<()> {
        let config = Config::load(&self.config)?;
        tracing::info!(config = %self.config.display(), "starting");
        let taper = Taper::from_config(&config)?;
        let mut stdout = io::stdout();
        taper.serve(BufReader::new(io::stdin()), &mut stdout).await
    }
}

#[derive(Parser, Clone, Debug)]
/// Label the tape in the drive, or in the changer's current slot
struct Label {
    /// Configuration file
    #[clap(short, long)]
    config: PathBuf,
    /// Overwrite an active tape, or write a label that doesn't match labelstr
    #[clap(short, long)]
    force: bool,
    #[clap(required(true))]
    label: String,
}

impl Label {
    fn main(self) -> Result<()> {
        let config = Config::load(&self.config)?;
        let mut tapes = config.tape_manager()?;
        tapes.relabel(&self.label, self.force)?;
        println!("labeled tape {}", self.label);
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// List the tapes in the catalog, most recently written first
struct List {
    /// Configuration file
    #[clap(short, long)]
    config: PathBuf,
}

impl List {
    fn main(self) -> Result<()> {
        let config = Config::load(&self.config)?;
        let policy = config.policy()?;
        let catalog = TapeList::load(&config.tapelist)?;
        println!("{:<10} {:<20} STATUS", "DATESTAMP", "LABEL");
        for e in catalog.entries() {
            let status = if catalog.is_active(&e.label, policy.tapecycle()) {
                "active"
            } else if !policy.matches(&e.label) {
                "foreign"
            } else if e.datestamp == UNUSED {
                "unused"
            } else {
                "reusable"
            };
            println!("{:<10} {:<20} {status}", e.datestamp, e.label);
        }
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
enum SubCommand {
    Label(Label),
    List(List),
    Run(Run),
}

#[derive(Parser, Clone, Debug)]
#[clap(version = crate_version!())]
struct Cli {
    #[clap(subcommand)]
    cmd: SubCommand,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli: Cli = Cli::parse();
    let r = match cli.cmd {
        SubCommand::Label(label) => label.main(),
        SubCommand::List(list) => list.main(),
        SubCommand::Run(run) => run.main().await,
    };
    if let Err(e) = r {
        eprintln!("Error: {e}");
        exit(1);
    }
}
