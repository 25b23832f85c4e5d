use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ethers::abi::Token;
use ethers::types::U256;
use log::info;

use superchain_common::{logging, metrics, utils, ChainId, Config};
use superchain_session::{ContractDescriptor, DecodedValue, Session};

#[derive(Parser)]
#[command(author, version, about = "Drive the Counter contract across several chains", long_about = None)]
struct Cli {
    /// Preset environment, `supersim` or `devnet`. Defaults to `SUPERCHAIN_ENV`.
    #[arg(long, conflicts_with = "config")]
    env: Option<String>,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Foundry artifact of the contract
    #[arg(long, value_name = "FILE", default_value = "out/Counter.sol/Counter.json")]
    artifact: PathBuf,

    /// Print collected metrics before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the contract address shared by every chain
    Address,
    /// Read the counter on every chain
    Read,
    /// Increment the counter on one chain
    Increment {
        #[arg(long)]
        chain: ChainId,
    },
    /// Send an increment from one chain to another and wait for it to land
    CrossIncrement {
        #[arg(long)]
        from: ChainId,
        #[arg(long)]
        to: ChainId,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Stream contract events from one chain until interrupted
    Watch {
        #[arg(long)]
        chain: ChainId,
        #[arg(long)]
        from_block: Option<u64>,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match (&cli.config, &cli.env) {
        (Some(path), _) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        (None, Some(env)) => Config::for_environment(env)?,
        (None, None) => Config::from_env()?,
    };
    Ok(config)
}

fn counter_value(value: &DecodedValue) -> Result<U256> {
    value
        .as_uint()
        .ok_or_else(|| anyhow!("number() returned {:?}", value.tokens()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.logging);

    let descriptor = ContractDescriptor::load_artifact(&cli.artifact)
        .with_context(|| format!("loading artifact {}", cli.artifact.display()))?;
    let session = Session::from_config(&config, descriptor)?;
    info!(
        "Session ready for chains {:?} as {}",
        session.chain_ids(),
        utils::format_address(&session.signer_address())
    );

    match cli.command {
        Commands::Address => {
            println!("{}", utils::format_address(&session.address()));
        }
        Commands::Read => {
            for (chain_id, result) in session.call_all("number", &[]).await {
                match result.map_err(anyhow::Error::from).and_then(|v| counter_value(&v)) {
                    Ok(value) => println!("{}: {}", chain_id, value),
                    Err(e) => println!("{}: error: {}", chain_id, e),
                }
            }
        }
        Commands::Increment { chain } => {
            let receipt = session.send_tx(chain, "increment", &[]).await?;
            println!(
                "{}: included in block {} ({:?})",
                chain, receipt.block_number, receipt.transaction_hash
            );
            let value = counter_value(&session.call(chain, "number", &[]).await?)?;
            println!("{}: counter is now {}", chain, value);
        }
        Commands::CrossIncrement {
            from,
            to,
            timeout_ms,
            interval_ms,
        } => {
            let observer = session.observer_config();
            let timeout = timeout_ms.map(Duration::from_millis).unwrap_or(observer.wait_timeout());
            let interval = interval_ms.map(Duration::from_millis).unwrap_or(observer.poll_interval());

            // Reading first also deploys on the destination if needed.
            let before = counter_value(&session.call(to, "number", &[]).await?)?;
            let receipt = session
                .send_tx(from, "incrementOnChain", &[Token::Uint(U256::from(to))])
                .await?;
            println!(
                "{}: message sent in block {} ({:?})",
                from, receipt.block_number, receipt.transaction_hash
            );

            let arrived = session
                .wait_for_call(to, "number", &[], timeout, interval, |value| {
                    value.as_uint().map_or(false, |now| now > before)
                })
                .await;
            if !arrived {
                return Err(anyhow!(
                    "counter on chain {} did not change within {:?}",
                    to,
                    timeout
                ));
            }

            for chain_id in [from, to] {
                let value = counter_value(&session.call(chain_id, "number", &[]).await?)?;
                println!("{}: {}", chain_id, value);
            }
        }
        Commands::Watch { chain, from_block } => {
            let from_block = match from_block {
                Some(block) => block,
                None => session.block_number(chain).await?,
            };
            let subscription = session.watch_contract_events(chain, from_block, None, |log| {
                println!(
                    "block {} log {} topic {:?} data 0x{}",
                    log.block_number,
                    log.log_index.unwrap_or_default(),
                    log.topic0(),
                    hex::encode(&log.data)
                );
            })?;
            info!("Watching chain {} from block {}, Ctrl-C to stop", chain, from_block);

            tokio::signal::ctrl_c().await?;
            subscription.cancel();
        }
    }

    if cli.metrics {
        print!("{}", metrics::gather_text());
    }

    Ok(())
}
