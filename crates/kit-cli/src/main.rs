//! kit CLI - a minimal git object database and clone client.

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// kit - content-addressed objects and smart HTTP clone
#[derive(Parser, Debug)]
#[command(name = "kit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Run as if started in <path>
    #[arg(short = 'C', global = true, value_name = "path")]
    root: Option<PathBuf>,

    /// Repository settings file (YAML)
    #[arg(long, global = true, value_name = "file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty repository
    Init,

    /// Compute an object id for a file and optionally store it
    HashObject {
        /// Write the object into the object database
        #[arg(short)]
        write: bool,
        /// File to hash
        file: PathBuf,
    },

    /// Show the content, type, or size of an object
    #[command(group(ArgGroup::new("mode").required(true).args(["pretty", "kind", "size", "exists"])))]
    CatFile {
        /// Pretty-print the object's content
        #[arg(short)]
        pretty: bool,
        /// Show the object's type
        #[arg(short = 't')]
        kind: bool,
        /// Show the object's size
        #[arg(short)]
        size: bool,
        /// Exit with zero status if the object exists
        #[arg(short)]
        exists: bool,
        /// Object id
        object: String,
    },

    /// List the contents of a tree (or of a commit's tree)
    LsTree {
        /// List only names
        #[arg(long)]
        name_only: bool,
        /// Tree or commit id
        object: String,
    },

    /// Create a tree object from the working directory
    WriteTree,

    /// Create a commit object for a tree
    CommitTree {
        /// Tree id
        tree: String,
        /// Parent commit id (repeatable)
        #[arg(short)]
        parent: Vec<String>,
        /// Commit message
        #[arg(short)]
        message: String,
    },

    /// Clone a repository over smart HTTP
    Clone {
        /// Repository URL
        url: String,
        /// Destination directory (default: derived from the URL)
        directory: Option<PathBuf>,
        /// Ref to fetch
        #[arg(short, long, default_value = kit_git::clone::DEFAULT_BRANCH)]
        branch: String,
        /// Skip the reachability check after unpacking
        #[arg(long)]
        no_verify: bool,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
        /// Print clone statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kit={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match commands::load_config(cli.config.as_deref(), cli.root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Init => commands::init(&config),
        Commands::HashObject { write, file } => commands::hash_object(&config, &file, write),
        Commands::CatFile {
            pretty,
            kind,
            size,
            exists,
            object,
        } => {
            let mode = if pretty {
                commands::CatMode::Pretty
            } else if kind {
                commands::CatMode::Type
            } else if size {
                commands::CatMode::Size
            } else {
                debug_assert!(exists);
                commands::CatMode::Exists
            };
            match commands::cat_file(&config, &object, mode) {
                Ok(false) => return ExitCode::FAILURE,
                other => other.map(|_| ()),
            }
        }
        Commands::LsTree { name_only, object } => commands::ls_tree(&config, &object, name_only),
        Commands::WriteTree => commands::write_tree(&config),
        Commands::CommitTree {
            tree,
            parent,
            message,
        } => commands::commit_tree(&config, &tree, &parent, &message),
        Commands::Clone {
            url,
            directory,
            branch,
            no_verify,
            timeout,
            json,
        } => commands::clone(
            &config,
            commands::CloneArgs {
                url,
                directory,
                branch,
                verify: !no_verify,
                timeout,
                json,
            },
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
