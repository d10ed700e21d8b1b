use std::path::PathBuf;

use anyhow::{Context as _, Result};
use ccctllib::plumbing::Panel;
use ccpanel::{
    cfg::Config,
    logs::LogKind,
    types::{ChainKey, ChainParam, ChartName, ExperimentParams, ParamDraft},
};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(about = "Drive the cross-chain experiment testbed")]
struct Cli {
    /// Configuration files, merged in order.
    #[clap(long, short, global = true)]
    config_file: Vec<PathBuf>,

    /// Backend base URL. Overrides the configuration files.
    #[clap(long, global = true)]
    api_base: Option<String>,

    /// Token passed to the log streams and the log tail.
    #[clap(long, global = true)]
    token: Option<String>,

    #[clap(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply any parameter edits, then start the system.
    Start(RunArgs),
    /// Stop the system.
    Stop,
    /// Start a run and follow its logs until the backend reports completion.
    Flow(RunArgs),
    /// Read or change chain parameters.
    Params(ParamsArgs),
    /// Show the stage timestamps of a transaction.
    Tx {
        tx_hash: String,
    },
    /// Ask the backend to draw result charts.
    Draw(DrawArgs),
    /// Read the system logs.
    Logs(LogsArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[clap(long, default_value_t = 0)]
    tx_count: u64,
    #[clap(long, default_value_t = 0)]
    interval_ms: u64,
    #[command(flatten)]
    draft: DraftArgs,
}

#[derive(Args, Debug, Default)]
struct DraftArgs {
    #[clap(long)]
    block_interval_src: Option<String>,
    #[clap(long)]
    block_interval_dst: Option<String>,
    #[clap(long)]
    max_block_size_src: Option<String>,
    #[clap(long)]
    max_block_size_dst: Option<String>,
    /// Applies to the source chain.
    #[clap(long)]
    inject_speed: Option<String>,
    /// Applies to both chains.
    #[clap(long)]
    total_data_size: Option<String>,
}

impl From<DraftArgs> for ParamDraft {
    fn from(args: DraftArgs) -> ParamDraft {
        ParamDraft {
            block_interval_src: args.block_interval_src.unwrap_or_default(),
            block_interval_dst: args.block_interval_dst.unwrap_or_default(),
            max_block_size_src: args.max_block_size_src.unwrap_or_default(),
            max_block_size_dst: args.max_block_size_dst.unwrap_or_default(),
            inject_speed: args.inject_speed.unwrap_or_default(),
            total_data_size: args.total_data_size.unwrap_or_default(),
        }
    }
}

impl From<RunArgs> for ExperimentParams {
    fn from(args: RunArgs) -> ExperimentParams {
        ExperimentParams {
            tx_count: args.tx_count,
            interval_ms: args.interval_ms,
            draft: args.draft.into(),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct ParamsArgs {
    #[clap(subcommand)]
    command: ParamsCommand,
}

#[derive(Subcommand, Debug)]
enum ParamsCommand {
    /// Show the current parameters of both chains.
    Get,
    /// Change a single parameter.
    Set {
        #[arg(value_parser = parse_chain)]
        chain: ChainKey,
        #[arg(value_parser = parse_param)]
        param: ChainParam,
        value: String,
    },
    /// Change several parameters at once.
    Apply(DraftArgs),
}

#[derive(Args, Debug)]
struct DrawArgs {
    /// A single chart to draw. Draws all of them if omitted.
    #[arg(value_parser = parse_chart)]
    chart: Option<ChartName>,
    /// JSON parameters, shared or keyed by chart name.
    #[clap(long, default_value = "{}")]
    params: String,
}

#[derive(Args, Debug)]
struct LogsArgs {
    #[clap(subcommand)]
    command: LogsCommand,
}

#[derive(Subcommand, Debug)]
enum LogsCommand {
    /// Fetch the most recent lines once.
    Tail {
        #[clap(long, short)]
        limit: Option<usize>,
    },
    /// Stream lines as they arrive.
    Follow {
        /// Only show these kinds (tx, node, system). Shows everything if omitted.
        #[clap(long, short, value_parser = parse_kind)]
        kind: Vec<LogKind>,
    },
}

fn parse_chain(s: &str) -> Result<ChainKey> {
    s.parse()
}

fn parse_param(s: &str) -> Result<ChainParam> {
    s.parse()
}

fn parse_chart(s: &str) -> Result<ChartName> {
    s.parse()
}

fn parse_kind(s: &str) -> Result<LogKind> {
    s.parse()
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(cli.verbose.log_level_filter().to_string().to_lowercase())
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config_file)?;
    if let Some(base) = &cli.api_base {
        config.api_base = base.clone();
    }
    if let Some(token) = &cli.token {
        config.token = Some(token.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config = load_config(&cli)?;
    let mut panel = Panel::new(config)?;

    match cli.command {
        Commands::Start(args) => panel.start(args.into()).await,
        Commands::Stop => panel.stop().await,
        Commands::Flow(args) => panel.flow(args.into()).await,
        Commands::Params(args) => match args.command {
            ParamsCommand::Get => panel.params_get().await,
            ParamsCommand::Set {
                chain,
                param,
                value,
            } => panel.params_set(chain, param, &value).await,
            ParamsCommand::Apply(draft) => panel.params_apply(draft.into()).await,
        },
        Commands::Tx { tx_hash } => panel.tx(&tx_hash).await,
        Commands::Draw(args) => {
            let params = serde_json::from_str(&args.params)
                .with_context(|| format!("--params is not valid JSON: {}", args.params))?;
            panel.draw(args.chart, params).await
        }
        Commands::Logs(args) => match args.command {
            LogsCommand::Tail { limit } => panel.logs_tail(limit).await,
            LogsCommand::Follow { kind } => panel.logs_follow(&kind).await,
        },
    }
}
