//! Arbiter CLI - operator front end for the decision ledger.
//!
//! Every subcommand emits exactly one machine-parseable JSON line:
//! success objects on stdout, `{"error": TOKEN, "detail": ...}` on
//! stderr. Exit code 0 means the requested check or write succeeded;
//! anything else is a failure a wrapping script must treat as fatal.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{append, policy, replay, verify};

#[derive(Parser)]
#[command(name = "arbiter")]
#[command(about = "Arbiter - tamper-evident decision ledger tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute and verify the ledger's hash chain
    VerifyChain {
        /// Ledger file to verify
        #[arg(long)]
        path: PathBuf,
    },

    /// Verify signature envelopes against a public key
    VerifySignatures {
        /// Ledger file to verify
        #[arg(long)]
        path: PathBuf,

        /// File holding the 64-char hex verifying key
        #[arg(long)]
        public_key: PathBuf,

        /// Treat unsigned entries as fatal
        #[arg(long, env = "SIG_REQUIRED", default_value = "0")]
        sig_required: String,
    },

    /// Validate an intent from stdin and append it to the ledger
    Append {
        /// Ledger file to append to
        #[arg(long)]
        path: PathBuf,

        /// Sign the entry (keyed by SIG_PRIV / SIG_KEY_ID)
        #[arg(long)]
        sign: bool,
    },

    /// Evaluate a feature record from stdin against a rule set
    PolicyEval {
        /// YAML rule set to load
        #[arg(long)]
        rules: PathBuf,
    },

    /// Record an execution fingerprint in the replay store
    RecordReplay {
        /// Directory the store may write under
        #[arg(long)]
        root: PathBuf,

        /// Store file, relative to the root
        #[arg(long)]
        path: PathBuf,

        /// 64-char hex fingerprint of the execution
        #[arg(long)]
        fingerprint: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).without_time())
        .init();

    let outcome = match cli.command {
        Commands::VerifyChain { path } => verify::chain(&path),
        Commands::VerifySignatures {
            path,
            public_key,
            sig_required,
        } => verify::signatures(&path, &public_key, sig_required == "1"),
        Commands::Append { path, sign } => append::run(&path, sign),
        Commands::PolicyEval { rules } => policy::run(&rules),
        Commands::RecordReplay {
            root,
            path,
            fingerprint,
        } => replay::run(&root, &path, &fingerprint),
    };

    match outcome {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("{}", failure.to_json());
            ExitCode::from(failure.exit_code)
        }
    }
}
