use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use facematch::config::{self, Config};
use facematch::export::{self, CopiedPhoto};
use facematch::storage::StoreFormat;
use facematch::train::{self, TrainSummary};
use facematch::{raw, CommandOracle, Embedding, FaceDatabase, MatchReport, Matcher, PathResolver};
use log::{error, info, LevelFilter};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "facematch")]
#[command(
    version,
    about = "Find the photos a person appears in by face embedding similarity"
)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log more to stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a query embedding against a face store
    #[command(allow_negative_numbers = true)]
    Match {
        /// Face store (.json, .bin)
        store: PathBuf,
        /// Query embedding as a JSON array or extractor output; `@file` reads a
        /// file, `-` reads stdin
        query: String,
        /// Similarity threshold (exclusive)
        threshold: Option<f64>,
        /// Folder the photos live under (defaults to the store's folder)
        model_root: Option<PathBuf>,
        /// Report each photo once, with its best face
        #[arg(long)]
        dedupe_by_photo: bool,
        /// Return at most this many matches
        #[arg(long)]
        max_results: Option<usize>,
        /// Photo subfolder tried under the model root
        #[arg(long)]
        photos_subdir: Option<String>,
        /// Copy matched photos into this folder
        #[arg(long)]
        copy_to: Option<PathBuf>,
    },
    /// Build a face store from a folder of photos
    Train {
        /// Photo folder
        folder: PathBuf,
        /// Store to write (.json, .bin)
        store: PathBuf,
        /// Only scan the top level of the folder
        #[arg(long)]
        no_recursive: bool,
        /// Extractor command line; the image path is appended. Must come last.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        extractor: Vec<String>,
    },
    /// Summarize a face store
    Info {
        store: PathBuf,
    },
    /// Re-encode a store, format chosen by the output extension
    Convert {
        input: PathBuf,
        output: PathBuf,
    },
    /// Show the effective config
    Config {
        /// Write the default config if none exists
        #[arg(long)]
        init: bool,
        /// Open the config file in $EDITOR
        #[arg(long, conflicts_with = "init")]
        edit: bool,
    },
}

#[derive(Serialize)]
struct Success<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct MatchResponse {
    #[serde(flatten)]
    report: MatchReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    copied: Option<Vec<CopiedPhoto>>,
}

#[derive(Serialize)]
struct TrainResponse {
    store: PathBuf,
    #[serde(flatten)]
    summary: TrainSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    store: PathBuf,
    records: usize,
    photos: usize,
    dimension: Option<usize>,
    inconsistent: usize,
    with_detection: usize,
    rejected: usize,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            let message = e.to_string();
            let first = message.lines().next().unwrap_or_default();
            print_failure(first.trim_start_matches("error: "));
            return ExitCode::FAILURE;
        }
    };
    init_logger(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(response) => {
            println!("{}", response);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            print_failure(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn init_logger(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    // stdout carries only the JSON response
    env_logger::builder()
        .filter_level(level)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();
}

fn print_failure(message: &str) {
    println!("{}", json!({ "success": false, "error": message }));
}

fn respond<T: Serialize>(body: T) -> Result<Value> {
    Ok(serde_json::to_value(Success {
        success: true,
        body,
    })?)
}

fn run(cli: Cli) -> Result<Value> {
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Match {
            store,
            query,
            threshold,
            model_root,
            dedupe_by_photo,
            max_results,
            photos_subdir,
            copy_to,
        } => {
            let mut options = cfg.match_options();
            if let Some(t) = threshold {
                options.threshold = t;
            }
            if !options.threshold.is_finite() {
                bail!("threshold must be a finite number");
            }
            options.dedupe_by_photo |= dedupe_by_photo;
            if max_results.is_some() {
                options.max_results = max_results;
            }
            let query = read_query(&query)?;

            let model_root = model_root
                .or_else(|| cfg.model_root.clone())
                .unwrap_or_else(|| store_dir(&store));
            let resolver = PathResolver::new(model_root)
                .with_photos_subdir(photos_subdir.unwrap_or_else(|| cfg.photos_subdir.clone()));

            let db = FaceDatabase::load(&store)?;
            info!(
                "Matching {}-d query against {} face(s), threshold {:.3}",
                query.dim(),
                db.len(),
                options.threshold
            );
            let report = Matcher::new(&resolver, options).run(&query, &db);
            let copied = match copy_to {
                Some(dir) => Some(export::copy_matches(&report.matches, &dir)?),
                None => None,
            };
            respond(MatchResponse { report, copied })
        }
        Commands::Train {
            folder,
            store,
            no_recursive,
            extractor,
        } => {
            let command = if extractor.is_empty() {
                &cfg.extractor
            } else {
                &extractor
            };
            let mut oracle = CommandOracle::new(command).context(
                "no extractor configured; pass --extractor or set `extractor` in the config",
            )?;
            let mut options = cfg.train_options();
            options.recursive &= !no_recursive;

            let (db, summary) = train::train(&folder, &mut oracle, &options)?;
            db.save(&store)
                .with_context(|| format!("saving trained store to {}", store.display()))?;
            info!("Wrote {} face(s) to {}", db.len(), store.display());
            respond(TrainResponse { store, summary })
        }
        Commands::Info { store } => {
            let db = FaceDatabase::load(&store)?;
            let with_detection = db.iter().filter(|(_, r)| r.detection.is_some()).count();
            respond(InfoResponse {
                records: db.len(),
                photos: db.photo_count(),
                dimension: db.dimension(),
                inconsistent: db.inconsistent(),
                with_detection,
                rejected: db.rejected(),
                store,
            })
        }
        Commands::Convert { input, output } => {
            let db = FaceDatabase::load(&input)?;
            let format = StoreFormat::from_path(&output).unwrap_or(StoreFormat::Json);
            db.save(&output)?;
            info!(
                "Converted {} record(s) to {} ({})",
                db.len(),
                output.display(),
                format.name()
            );
            respond(json!({
                "input": input,
                "output": output,
                "records": db.len(),
                "format": format.name(),
            }))
        }
        Commands::Config { init, edit } => {
            let path = config_path.unwrap_or(&config::CONFIG_PATH).to_path_buf();
            if init && !path.exists() {
                config::save_config(&Config::default(), Some(&path))?;
                info!("Wrote default config to {}", path.display());
            }
            if edit {
                open_config(&path)?;
            }
            let cfg = config::load_config(Some(&path))?;
            respond(json!({ "path": path, "config": cfg }))
        }
    }
}

/// Where photos are looked up when no model root is given.
fn store_dir(store: &Path) -> PathBuf {
    match store.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn read_query(arg: &str) -> Result<Embedding> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading query from stdin")?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("reading query file {}", path))?
    } else {
        arg.to_string()
    };
    let value: Value = serde_json::from_str(text.trim()).context("query is not valid JSON")?;
    let query = raw::query_from_value(&value).context("invalid query embedding")?;
    if !query.is_finite() {
        bail!("query embedding contains non-finite values");
    }
    Ok(query)
}

fn open_config(path: &Path) -> Result<()> {
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    info!("Opening config file: {}", path.display());

    // stdout is reserved for the JSON response
    let status = std::process::Command::new(editor)
        .arg(path)
        .stdout(std::io::stderr())
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        bail!("Editor exited with non-zero status");
    }
    Ok(())
}
