//! Command-line front end for the playground engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use runthatcode::{
    compose_with, validate, ComposeOptions, ComposedDocument, FileStore, FragmentKind, LogUi,
    MemoryStore, Playground, PlaygroundConfig, RunOutcome, RunToken, SnapshotStore,
};

#[derive(Parser)]
#[command(
    name = "runthatcode",
    version,
    about = "Validate, compose and run HTML/CSS/JS playground fragments"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check each fragment and list its issues
    Validate(FragmentArgs),

    /// Print the document a run would load
    Compose {
        #[command(flatten)]
        fragments: FragmentArgs,

        /// Print a base64 data: URL instead of the raw document
        #[arg(long = "data-url")]
        data_url: bool,

        /// Rewrite `</style` and `</script` inside user CSS/JS
        #[arg(long = "escape-closing-tags")]
        escape_closing_tags: bool,

        /// Tag error reports with the token of this run generation
        #[arg(long = "token-generation", value_name = "N")]
        token_generation: Option<u64>,
    },

    /// Run the fragments in the sandboxed preview and report what it posts
    Run {
        #[command(flatten)]
        fragments: FragmentArgs,

        /// How long to keep listening for runtime errors after loading
        #[arg(long = "wait-ms", default_value_t = 500)]
        wait_ms: u64,

        /// Snapshot store file; fragments not given on the command line are
        /// restored from it and the final state is saved back
        #[arg(long = "store", value_name = "PATH")]
        store: Option<PathBuf>,

        /// Show runtime errors from every load, not just the current run
        #[arg(long = "permissive")]
        permissive: bool,
    },
}

#[derive(Args)]
struct FragmentArgs {
    /// HTML fragment file
    #[arg(long = "html", value_name = "FILE")]
    html: Option<PathBuf>,

    /// CSS fragment file
    #[arg(long = "css", value_name = "FILE")]
    css: Option<PathBuf>,

    /// JavaScript fragment file
    #[arg(long = "js", value_name = "FILE")]
    js: Option<PathBuf>,
}

impl FragmentArgs {
    /// Read every given file, keyed by fragment kind
    fn read(&self) -> Result<Vec<(FragmentKind, String)>> {
        let mut out = Vec::new();
        for (kind, path) in [
            (FragmentKind::Html, &self.html),
            (FragmentKind::Css, &self.css),
            (FragmentKind::Js, &self.js),
        ] {
            if let Some(path) = path {
                out.push((kind, read_fragment(path)?));
            }
        }
        Ok(out)
    }

    fn text_of(fragments: &[(FragmentKind, String)], kind: FragmentKind) -> &str {
        fragments
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, text)| text.as_str())
            .unwrap_or("")
    }
}

fn read_fragment(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let exit_code = match run_command(cli.command).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {:#}", error);
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run_command(command: Command) -> Result<i32> {
    match command {
        Command::Validate(args) => {
            let fragments = args.read()?;
            let config = PlaygroundConfig::default();
            let mut issues = 0;
            for (kind, text) in &fragments {
                let report = validate::validate(*kind, text);
                if report.has_errors() {
                    issues += report.errors.len();
                    println!("{}\n", report.summary(config.max_listed_issues));
                } else {
                    println!("{}: no issues", kind.label());
                }
            }
            Ok(if issues > 0 { 1 } else { 0 })
        }
        Command::Compose {
            fragments,
            data_url,
            escape_closing_tags,
            token_generation,
        } => {
            let fragments = fragments.read()?;
            let (html, css, js) = (
                FragmentArgs::text_of(&fragments, FragmentKind::Html),
                FragmentArgs::text_of(&fragments, FragmentKind::Css),
                FragmentArgs::text_of(&fragments, FragmentKind::Js),
            );
            let options = ComposeOptions {
                token: token_generation.map(|g| RunToken::derive(g, html, css, js)),
                escape_closing_tags,
            };
            let document = ComposedDocument::new(compose_with(html, css, js, &options));
            if data_url {
                println!("{}", document.to_data_url());
            } else {
                println!("{}", document);
            }
            Ok(0)
        }
        Command::Run {
            fragments,
            wait_ms,
            store,
            permissive,
        } => {
            let fragments = fragments.read()?;
            let config = PlaygroundConfig {
                correlate_runs: !permissive,
                ..PlaygroundConfig::default()
            };
            let store: Box<dyn SnapshotStore> = match store {
                Some(path) => Box::new(FileStore::new(path)),
                None => Box::new(MemoryStore::new()),
            };

            let (handle, task) = Playground::launch(config, store, Box::new(LogUi::new()))?;
            for (kind, text) in fragments {
                handle.edit(kind, text).await?;
            }
            let outcome = handle.run().await?;
            match &outcome {
                RunOutcome::Demo => info!("all fragments are blank; showing the demo preview"),
                RunOutcome::Code { generation, load_id, .. } => {
                    info!("run #{} loaded as {}", generation, load_id)
                }
            }

            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            let status = handle.status().await?;
            handle.shutdown().await?;
            if let Err(e) = task.await {
                warn!("playground task ended abnormally: {}", e);
            }

            let failed = status.has_errors
                || status.state == runthatcode::RunState::ErrorReported;
            Ok(if failed { 1 } else { 0 })
        }
    }
}
