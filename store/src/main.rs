#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use assembly_store::storage::DatabaseFile;
use assembly_store::{Database, DatabaseError, IndexKind, RecordId, StoreConfig, StoreOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: assembly-store <command>

commands:
  init                                  create an empty database
  stats                                 print header and index statistics
  add <seq|contig> <name> <rec>         add a name to an index
  query <seq|contig> <name> [--prefix]  look up a name
  list <seq|contig> [start]             list index entries in name order
  remove <seq|contig> <name>            remove a name from an index
  check                                 verify both index trees
  migrate                               rewrite index nodes in the configured format";

#[derive(Debug)]
enum Command {
    Init,
    Stats,
    Add {
        index: IndexKind,
        name: String,
        rec: RecordId,
    },
    Query {
        index: IndexKind,
        name: String,
        prefix: bool,
    },
    List {
        index: IndexKind,
        start: Option<String>,
    },
    Remove {
        index: IndexKind,
        name: String,
    },
    Check,
    Migrate,
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let index = |pos: usize| -> Result<IndexKind, String> {
        args.get(pos)
            .ok_or_else(|| "missing index name".to_string())?
            .parse::<IndexKind>()
            .map_err(|e| e.to_string())
    };
    let arg = |pos: usize, what: &str| -> Result<String, String> {
        args.get(pos).cloned().ok_or_else(|| format!("missing {what}"))
    };

    match args.first().map(String::as_str) {
        Some("init") => Ok(Command::Init),
        Some("stats") => Ok(Command::Stats),
        Some("check") => Ok(Command::Check),
        Some("migrate") => Ok(Command::Migrate),
        Some("add") => {
            let raw = arg(3, "record id")?;
            let rec = raw
                .parse::<u64>()
                .ok()
                .and_then(RecordId::from_raw)
                .ok_or_else(|| format!("'{raw}' is not a record id"))?;
            Ok(Command::Add {
                index: index(1)?,
                name: arg(2, "name")?,
                rec,
            })
        }
        Some("query") => Ok(Command::Query {
            index: index(1)?,
            name: arg(2, "name")?,
            prefix: args.get(3).is_some_and(|flag| flag == "--prefix"),
        }),
        Some("list") => Ok(Command::List {
            index: index(1)?,
            start: args.get(2).cloned(),
        }),
        Some("remove") => Ok(Command::Remove {
            index: index(1)?,
            name: arg(2, "name")?,
        }),
        Some(other) => Err(format!("unknown command '{other}'")),
        None => Err("no command given".to_string()),
    }
}

fn run(config: &StoreConfig, options: StoreOptions, command: Command) -> Result<(), DatabaseError> {
    let path = config.database_path.as_path();
    if let Command::Init = command {
        Database::create_file(path, options)?.close()?;
        println!("created {}", path.display());
        return Ok(());
    }

    let options = StoreOptions {
        migrate_on_open: options.migrate_on_open || matches!(command, Command::Migrate),
        ..options
    };
    let mut db: Database<DatabaseFile> = Database::open_file(path, options)?;

    match command {
        Command::Init | Command::Migrate => {}
        Command::Stats => {
            let header = db.header()?.clone();
            println!("schema version: {}", header.schema_version);
            println!("node format:    {}", header.node_format);
            println!("contigs:        {}", header.num_contigs);
            println!("sequences:      {}", header.num_seqs);
            println!("records:        {}", db.store().record_count());
            println!("file size:      {} bytes", db.store().file_len());
            for index in IndexKind::ALL {
                let stats = db.index_check(index)?;
                println!(
                    "{index} index:      {} entries, depth {}, {} nodes",
                    stats.entries, stats.depth, stats.nodes
                );
            }
        }
        Command::Add { index, name, rec } => {
            db.index_add(index, &name, rec)?;
        }
        Command::Query {
            index,
            name,
            prefix: true,
        } => {
            for rec in db.index_query_all(index, &name)? {
                println!("{rec}");
            }
        }
        Command::Query { index, name, .. } => match db.index_query(index, &name, false)? {
            Some(rec) => println!("{rec}"),
            None => println!("not found"),
        },
        Command::List { index, start } => {
            for (name, rec) in db.index_iterate(index, start.as_deref())? {
                println!("{name}\t{rec}");
            }
        }
        Command::Remove { index, name } => {
            if !db.index_remove(index, &name, None)? {
                println!("not found");
            }
        }
        Command::Check => {
            for index in IndexKind::ALL {
                let stats = db.index_check(index)?;
                println!("{index}: ok ({} entries)", stats.entries);
            }
        }
    }

    db.close()?;
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assembly_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let options = match config.options() {
        Ok(options) => options,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(
        "Loaded configuration: database_path={}, node_format={}",
        config.database_path.display(),
        config.node_format
    );

    if let Err(e) = run(&config, options, command) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
