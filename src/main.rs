use clap::{Parser, Subcommand};
use nutmeg::cli::{self, CliError};
use std::io::{self, Read};

#[derive(Parser)]
#[command(name = "nutmeg")]
#[command(about = "nutmeg - MongoDB-flavored queries and aggregation over JSON documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log internal evaluation details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a JSON array of documents with a criteria document
    Find {
        /// The criteria document, e.g. '{"age": {"$gte": 18}}'
        criteria: String,

        /// JSON input (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<String>,

        /// Pretty-print the output (default when stdout is a terminal)
        #[arg(short, long)]
        pretty: bool,
    },

    /// Run an aggregation pipeline over a JSON array of documents
    Aggregate {
        /// The pipeline stages, e.g. '[{"$group": {"_id": "$city"}}]'
        pipeline: String,

        /// JSON input (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<String>,

        /// Pretty-print the output (default when stdout is a terminal)
        #[arg(short, long)]
        pretty: bool,
    },
}

fn read_input(input: Option<String>) -> Result<String, CliError> {
    match input {
        Some(text) => Ok(text),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| CliError::Input(e.to_string()))?;
            Ok(buf)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Warn
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Find {
            criteria,
            input,
            pretty,
        } => {
            let pretty = pretty || atty::is(atty::Stream::Stdout);
            read_input(input).and_then(|text| cli::run_find(&text, &criteria, pretty))
        }
        Commands::Aggregate {
            pipeline,
            input,
            pretty,
        } => {
            let pretty = pretty || atty::is(atty::Stream::Stdout);
            read_input(input).and_then(|text| cli::run_aggregate(&text, &pipeline, pretty))
        }
    };

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
