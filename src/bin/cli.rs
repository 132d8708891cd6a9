//! Tempograph command line interface
//!
//! Drives one batch run: transactions in, per-client predicted times out.

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use tempograph::config::RunConfig;
use tempograph::driver;

const ARG_HELP: &str = "\
Arguments (KEY=VALUE):

  transactions=path : Tab separated text file containing: (emitter, description, weight, client, time).
  max_events=number : The maximum number of events to auto detect if 'events' is not given.
  events=path       : Optional tab separated text file containing: (emitter, description, weight, code).
  clients=path      : Optional text file with client ids to define which clients are fitted.
  targets=path      : Tab separated text file containing: (client, time) of the target to predict.
  train=path        : An optional alternative (to transactions) for sequence detection and fitting.
  test=path         : An optional alternative (to transactions) for sequence detection and predicting.
  output=folder     : A folder to write the output of the execution.
  transform=linear  : Fit the time without any transformation (default is 'log').
  aggregate=mean    : Fit aggregation (default is 'minimax'), 'longest' is also a valid option.
  fit_p=0.9         : Fit probability of the binomial interval. (0 is no interval, default is 0.9.)
  tree_depth=8      : Fit tree depth == maximum learned sequence length. Default is 8.
  as_states=1       : Fit as states == removing consecutive same codes. Default is 0.

(All times must be \"%Y-%m-%d %H:%M:%S\".)";

/// Learn and predict per-client times to a target event from a
/// transactional stream.
#[derive(Parser)]
#[command(name = "tempograph", version, after_help = ARG_HELP)]
struct Cli {
    /// KEY=VALUE arguments, e.g. `transactions=rows.tsv targets=t.tsv output=out`
    #[arg(value_name = "KEY=VALUE")]
    args: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.args.len() < 3 {
        let _ = Cli::command().print_help();
        std::process::exit(1);
    }

    if let Err(err) = try_run(&cli.args) {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}

fn try_run(args: &[String]) -> anyhow::Result<()> {
    let config = RunConfig::from_args(args).context("invalid arguments")?;
    driver::run(&config).context("run failed")?;

    Ok(())
}
