use alloy::primitives::{Address, BlockNumber};
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use eth_event_backfill::abi_registry::{AbiStore, PgAbiStore, add_abi};
use eth_event_backfill::backfill;
use eth_event_backfill::backfill::plan::{EventBackfillPlan, EventBackfillRequest};
use eth_event_backfill::config::{ChunkArgs, DbArgs, RpcArgs};
use eth_event_backfill::database;
use eth_event_backfill::token::ERC20Token;
use eyre::Result;
use log::info;
use std::ffi::OsString;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

/// Backfill decoded Ethereum event logs into Postgres
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    MigrateUp {
        #[command(flatten)]
        db: DbArgs,
    },
    /// Register a contract ABI under a name
    AddAbi {
        /// Name used to reference the ABI, e.g. UniswapV3Pool
        name: String,
        /// ABI JSON file, or a compiler artifact with an `abi` key
        file: PathBuf,
        #[command(flatten)]
        db: DbArgs,
    },
    /// List registered ABIs and their events
    ListAbis {
        #[command(flatten)]
        db: DbArgs,
    },
    /// Backfill historical data
    Backfill {
        #[command(subcommand)]
        target: BackfillTarget,
    },
    /// Print name, symbol and decimals of an ERC20 token
    Token {
        address: Address,
        #[command(flatten)]
        rpc: RpcArgs,
    },
}

#[derive(Subcommand, Debug)]
enum BackfillTarget {
    /// Backfill decoded contract events
    Events(EventBackfillArgs),
}

#[derive(Args, Debug)]
struct EventBackfillArgs {
    /// First block to backfill, also accepted as `-from`
    #[arg(long = "from-block", visible_alias = "from")]
    from_block: Option<BlockNumber>,

    /// Block to stop at, not itself backfilled. Also accepted as `-to`
    #[arg(long = "to-block", visible_alias = "to")]
    to_block: Option<BlockNumber>,

    /// Contract emitting the events
    #[arg(long)]
    contract_address: Address,

    /// Registered ABI used to decode the events, also accepted as `-abi`
    #[arg(long = "contract-abi", visible_alias = "abi")]
    contract_abi: Vec<String>,

    /// Event to backfill, can be repeated
    #[arg(long = "event-name")]
    event_names: Vec<String>,

    #[command(flatten)]
    chunk: ChunkArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    rpc: RpcArgs,
}

impl EventBackfillArgs {
    fn request(&self) -> EventBackfillRequest {
        EventBackfillRequest {
            abi_names: self.contract_abi.clone(),
            event_names: self.event_names.clone(),
            contract_address: self.contract_address,
            from_block: self.from_block,
            to_block: self.to_block,
            chunk_size: self.chunk.chunk_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse_from(single_dash_flags(std::env::args_os()));
    match cli.command {
        Command::MigrateUp { db } => {
            let pool = database::connect(&db.db_url).await?;
            database::migrate_up(&pool).await?;
            println!("Database migrations applied");
        }
        Command::AddAbi { name, file, db } => {
            let store = PgAbiStore::new(database::connect(&db.db_url).await?);
            match add_abi(&store, &name, &file).await {
                Ok(abi) => println!("Added ABI {} with {} events", name, abi.events().count()),
                Err(e) => println!("Error Occurred Adding ABI: {e}"),
            }
        }
        Command::ListAbis { db } => {
            let store = PgAbiStore::new(database::connect(&db.db_url).await?);
            for stored in store.list_abis().await? {
                let events: Vec<&str> = stored.abi.events.keys().map(String::as_str).collect();
                println!("{}: {}", stored.name, events.join(", "));
            }
        }
        Command::Backfill {
            target: BackfillTarget::Events(args),
        } => backfill_events(args).await?,
        Command::Token { address, rpc } => {
            let provider = match rpc.connect() {
                Ok(provider) => provider,
                Err(e) => {
                    println!("Error Occurred Fetching Token: {e}");
                    return Ok(());
                }
            };
            println!("{}", ERC20Token::from_chain(&provider, address).await?);
        }
    }

    Ok(())
}

async fn backfill_events(args: EventBackfillArgs) -> Result<()> {
    let mut pool = database::connect(&args.db.db_url).await?;
    let store = PgAbiStore::new(pool.clone());

    let planned = match EventBackfillPlan::try_new(&store, args.request()).await {
        Ok(plan) => args.rpc.connect().map(|provider| (plan, provider)),
        Err(e) => Err(e),
    };
    let (plan, provider) = match planned {
        Ok(planned) => planned,
        Err(e) => {
            println!("Error Occurred Generating Backfill: {e}");
            return Ok(());
        }
    };

    println!("{plan}");
    if !args.yes && !confirm("Execute Backfill?")? {
        println!("Backfill cancelled");
        return Ok(());
    }

    let summary = backfill::start(&mut pool, provider, &plan, &args.chunk.block_cache).await?;
    info!("{:?}", summary);

    println!(
        "Backfilled {} events across {} chunks, {} new rows",
        summary.logs,
        summary.chunks,
        summary.total_inserted()
    );
    for (table, inserted) in &summary.inserted {
        println!("    {table}: {inserted}");
    }

    Ok(())
}

/// Rewrites `-from`, `-to` and `-abi`, which clap would read as bundled short flags.
fn single_dash_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-from") => OsString::from("--from-block"),
            Some("-to") => OsString::from("--to-block"),
            Some("-abi") => OsString::from("--contract-abi"),
            _ => arg,
        })
        .collect()
}

/// Interactive prompt on a terminal, plain line read when stdin is piped.
fn confirm(prompt: &str) -> Result<bool> {
    if io::stdin().is_terminal() {
        return Ok(Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?);
    }

    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
