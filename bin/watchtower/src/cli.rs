use clap::Parser;
use std::{
    env,
    str::FromStr,
};
use tracing_subscriber::{
    filter::EnvFilter,
    layer::SubscriberExt,
    registry,
    Layer,
};

pub mod run;

#[derive(Parser, Debug)]
#[clap(
    name = "watchtower",
    about = "Slashing round watchtower",
    version,
    rename_all = "kebab-case"
)]
pub struct Opt {
    #[clap(subcommand)]
    command: Watchtower,
}

#[derive(Debug, Parser)]
pub enum Watchtower {
    Run(run::Command),
}

pub const LOG_FILTER: &str = "RUST_LOG";
pub const HUMAN_LOGGING: &str = "HUMAN_LOGGING";

pub fn init_logging() -> anyhow::Result<()> {
    let filter = match env::var_os(LOG_FILTER) {
        Some(_) => {
            EnvFilter::try_from_default_env().expect("Invalid `RUST_LOG` provided")
        }
        None => EnvFilter::new("info"),
    };

    let human_logging = env::var_os(HUMAN_LOGGING)
        .map(|s| {
            bool::from_str(s.to_str().unwrap())
                .expect("Expected `true` or `false` to be provided for `HUMAN_LOGGING`")
        })
        .unwrap_or(true);

    let layer = tracing_subscriber::fmt::Layer::default().with_writer(std::io::stderr);

    let fmt = if human_logging {
        layer
            .with_ansi(true)
            .with_level(true)
            .with_line_number(true)
            .boxed()
    } else {
        // machine parseable structured logs
        layer
            .with_ansi(false)
            .with_level(true)
            .with_line_number(true)
            .json()
            .boxed()
    };

    let subscriber = registry::Registry::default().with(filter).with(fmt);

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting global default failed");
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    init_logging()?;
    let opt = Opt::parse();
    match opt.command {
        Watchtower::Run(command) => run::exec(command).await,
    }
}
