#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sbtree::storage::FileError;
use sbtree::{
    ConfigError, FileStore, LongCodec, PageStore, RecordId, SBTree, StorageError, TreeConfig,
    TreeError,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Tree = SBTree<LongCodec, FileStore>;

/// B+tree index tool
#[derive(Parser, Debug)]
#[command(
    name = "sbtree",
    version,
    about = "Create, edit and scan B+tree indexes stored in a page file"
)]
struct Cli {
    /// Store file, created on first use
    #[arg(value_name = "DB_FILE")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// List the trees in the store
    List,
    /// Create an empty tree
    Create { tree: String },
    /// Insert or replace an entry
    #[command(allow_negative_numbers = true)]
    Put {
        tree: String,
        key: i64,
        /// Value as cluster:position
        value: RecordId,
    },
    /// Look up one key
    #[command(allow_negative_numbers = true)]
    Get { tree: String, key: i64 },
    /// Remove one key
    #[command(allow_negative_numbers = true)]
    Remove { tree: String, key: i64 },
    /// Entries with keys >= from
    #[command(allow_negative_numbers = true)]
    Major {
        tree: String,
        from: i64,
        /// Skip the entry equal to from
        #[arg(long)]
        exclusive: bool,
        /// Stop after this many entries
        #[arg(long, default_value_t = usize::MAX, hide_default_value = true)]
        limit: usize,
    },
    /// Entries with keys <= to, in descending order
    #[command(allow_negative_numbers = true)]
    Minor {
        tree: String,
        to: i64,
        /// Skip the entry equal to to
        #[arg(long)]
        exclusive: bool,
        /// Stop after this many entries
        #[arg(long, default_value_t = usize::MAX, hide_default_value = true)]
        limit: usize,
    },
    /// Entries with keys in [from, to]
    #[command(allow_negative_numbers = true)]
    Between {
        tree: String,
        from: i64,
        to: i64,
        #[arg(long)]
        exclusive_from: bool,
        #[arg(long)]
        exclusive_to: bool,
        /// Stop after this many entries
        #[arg(long, default_value_t = usize::MAX, hide_default_value = true)]
        limit: usize,
    },
    /// Number of entries
    Count { tree: String },
    /// Remove every entry
    Clear { tree: String },
    /// Delete the tree and free its pages
    Drop { tree: String },
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    File(FileError),
    Storage(StorageError),
    Tree(TreeError),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::File(e) => write!(f, "store error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Tree(e) => write!(f, "{e}"),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<FileError> for CliError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<TreeError> for CliError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sbtree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

#[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
fn run(cli: Cli) -> Result<(), CliError> {
    let store = Arc::new(FileStore::open_or_create(&cli.db)?);
    let open = |name: &str| Tree::open(name, LongCodec, Arc::clone(&store));

    match cli.command {
        Command::List => {
            for entry in store.superblock().catalog {
                println!("{}", entry.name);
            }
        }
        Command::Create { tree } => {
            let tree_config = TreeConfig::from_env()?;
            let tree = Tree::create(&tree, LongCodec, Arc::clone(&store), &tree_config)?;
            let (leaf, internal) = tree.fan_out();
            println!("created {} (leaf fan-out {leaf}, internal fan-out {internal})", tree.name());
        }
        Command::Put { tree, key, value } => match open(&tree)?.put(key, value)? {
            Some(previous) => println!("{key} = {value} (replaced {previous})"),
            None => println!("{key} = {value}"),
        },
        Command::Get { tree, key } => match open(&tree)?.get(&key)? {
            Some(value) => println!("{value}"),
            None => println!("{key} not found"),
        },
        Command::Remove { tree, key } => match open(&tree)?.remove(&key)? {
            Some(value) => println!("removed {key} = {value}"),
            None => println!("{key} not found"),
        },
        Command::Major {
            tree,
            from,
            exclusive,
            limit,
        } => {
            let tree = open(&tree)?;
            print_entries(tree.cursor_major(from, !exclusive), limit)?;
        }
        Command::Minor {
            tree,
            to,
            exclusive,
            limit,
        } => {
            let tree = open(&tree)?;
            print_entries(tree.cursor_minor(to, !exclusive), limit)?;
        }
        Command::Between {
            tree,
            from,
            to,
            exclusive_from,
            exclusive_to,
            limit,
        } => {
            let tree = open(&tree)?;
            print_entries(
                tree.cursor_between(from, !exclusive_from, to, !exclusive_to),
                limit,
            )?;
        }
        Command::Count { tree } => println!("{}", open(&tree)?.size()),
        Command::Clear { tree } => {
            let mut tree = open(&tree)?;
            tree.clear()?;
            println!("cleared {}", tree.name());
        }
        Command::Drop { tree } => {
            open(&tree)?.delete()?;
            println!("dropped {tree}");
        }
    }

    store.sync()?;
    Ok(())
}

fn print_entries(
    entries: impl Iterator<Item = Result<(i64, RecordId), TreeError>>,
    limit: usize,
) -> Result<(), CliError> {
    for entry in entries.take(limit) {
        let (key, value) = entry?;
        println!("{key}\t{value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn parse(line: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("sbtree").chain(line.split_whitespace()))
    }

    #[test]
    fn test_parse_point_commands() {
        let cli = parse("db.sbt put ages 42 7:1000").expect("put");
        assert_eq!(cli.db, PathBuf::from("db.sbt"));
        assert_eq!(
            cli.command,
            Command::Put {
                tree: "ages".to_string(),
                key: 42,
                value: RecordId::new(7, 1000),
            }
        );

        let cli = parse("db.sbt get ages -3").expect("get");
        assert_eq!(
            cli.command,
            Command::Get {
                tree: "ages".to_string(),
                key: -3,
            }
        );
    }

    #[test]
    fn test_parse_range_flags() {
        let cli = parse("db.sbt between ages 10 20 --exclusive-to --limit 5").expect("between");
        assert_eq!(
            cli.command,
            Command::Between {
                tree: "ages".to_string(),
                from: 10,
                to: 20,
                exclusive_from: false,
                exclusive_to: true,
                limit: 5,
            }
        );

        let cli = parse("db.sbt major ages -10 --exclusive").expect("major");
        assert_eq!(
            cli.command,
            Command::Major {
                tree: "ages".to_string(),
                from: -10,
                exclusive: true,
                limit: usize::MAX,
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let kind = |line: &str| parse(line).expect_err(line).kind();

        assert!(parse("db.sbt").is_err());
        assert_eq!(kind("db.sbt get ages"), ErrorKind::MissingRequiredArgument);
        assert_eq!(kind("db.sbt get ages ten"), ErrorKind::ValueValidation);
        assert_eq!(kind("db.sbt put ages 1 7"), ErrorKind::ValueValidation);
        assert_eq!(kind("db.sbt major ages 1 --limit"), ErrorKind::InvalidValue);
        assert_eq!(kind("db.sbt count ages --verbose"), ErrorKind::UnknownArgument);
        assert_eq!(kind("db.sbt explode ages"), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_against_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("cli.sbt");
        let run_line = |line: &str| {
            let full = format!("{} {line}", db.display());
            run(parse(&full).expect("parse")).expect("run");
        };

        run_line("create ages");
        run_line("put ages 5 1:5");
        run_line("put ages 6 1:6");
        run_line("remove ages 5");

        let store = Arc::new(FileStore::open(&db).expect("reopen"));
        let tree = Tree::open("ages", LongCodec, store).expect("open tree");
        assert_eq!(tree.size(), 1);
        assert_eq!(tree.get(&6).expect("get"), Some(RecordId::new(1, 6)));
        assert_eq!(tree.get(&5).expect("get"), None);
    }
}
