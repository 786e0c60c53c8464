//! Flashpack - build, inspect, verify and port signed flash containers
//!
//! # Usage
//!
//! ```bash
//! # Show the partitions of a raw image
//! flashpack partitions disk.img
//!
//! # Build a container
//! flashpack generate disk.img disk.fpk --platform-ids "Contoso.Board.A" \
//!     --anti-theft-version 1.1 --os-version 10.0.1
//!
//! # Check every block against the catalog
//! flashpack verify disk.fpk
//!
//! # Rebuild with another container's metadata
//! flashpack port disk.fpk ported.fpk --metadata-from other.fpk
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use clap_mangen::Man;
use console::style;
use flashpack_core::Settings;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod progress;

/// Flashpack - build, inspect, verify and port signed flash containers
#[derive(Parser)]
#[command(name = "flashpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Suppress ALL output (implies --quiet)
    #[arg(long, global = true)]
    silent: bool,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true, env = "FLASHPACK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a container from a raw disk image
    Generate {
        /// Raw disk image with a GPT or MBR partition table
        image: PathBuf,

        /// Container file to create
        output: PathBuf,

        /// Semicolon-delimited platform IDs, one store each
        #[arg(short, long, value_name = "IDS")]
        platform_ids: Option<String>,

        /// Device sector size in bytes
        #[arg(long)]
        sector_size: Option<u32>,

        /// Block size (e.g., 128K, 1M)
        #[arg(short, long)]
        block_size: Option<String>,

        /// Anti-theft version (e.g., 1.1)
        #[arg(long)]
        anti_theft_version: String,

        /// OS version (e.g., 10.0.1)
        #[arg(long)]
        os_version: String,

        /// File listing partitions to leave out, one per line
        #[arg(short, long, value_name = "FILE")]
        excluded_partitions: Option<PathBuf>,

        /// Longest run of blank blocks that may be left out
        #[arg(long)]
        max_blank_blocks: Option<u64>,

        /// Flash update version (v1 or v2)
        #[arg(long)]
        flash_update_version: Option<String>,

        /// Device targeting rules (e.g., "Board.A:>=10.0;Board.B:=10.0.1")
        #[arg(long)]
        device_targets: Option<String>,

        /// Catalog digest algorithm (sha256, sha512)
        #[arg(long)]
        digest: Option<String>,
    },

    /// Rebuild a container, optionally taking metadata from another
    Port {
        /// Container providing partitions and payload
        source: PathBuf,

        /// Container file to create (must not exist)
        output: PathBuf,

        /// Container providing manifest and store headers
        #[arg(long, value_name = "CONTAINER")]
        metadata_from: Option<PathBuf>,
    },

    /// Show a container's headers, stores and partitions
    Inspect {
        /// Container file
        container: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Verify every payload block against the catalog
    Verify {
        /// Container file
        container: PathBuf,
    },

    /// Write one partition's raw image out of a container
    Extract {
        /// Container file
        container: PathBuf,

        /// Partition name
        partition: String,

        /// File to write
        output: PathBuf,

        /// Store to read the partition layout from
        #[arg(long, default_value_t = 0)]
        store: u16,
    },

    /// List the partitions of a raw disk image
    Partitions {
        /// Raw disk image
        image: PathBuf,

        /// Sector size used for the alignment check
        #[arg(long, default_value_t = flashpack_core::DEFAULT_SECTOR_SIZE)]
        sector_size: u32,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show or create the configuration file
    Config {
        /// Create a configuration file with default values
        #[arg(long)]
        init: bool,

        /// Print the configuration file path
        #[arg(long)]
        path: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man pages
    Mangen {
        /// Output directory for man pages
        #[arg(short, long, default_value = ".")]
        out_dir: String,
    },
}

fn main() {
    // Set up panic handler for nicer error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  {} {}", style("Caused by:").yellow(), cause);
            source = cause.source();
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // --silent implies --quiet (no logs at all, not even errors to tracing)
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet || cli.silent {
        EnvFilter::new("off")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load_from_path(cli.config.clone().or_else(Settings::config_path));
    let silent = cli.silent || cli.quiet || settings.behavior.quiet;

    // First Ctrl+C asks the running operation to stop, second one exits
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel_flag);
    let silent_for_handler = cli.silent;
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            if !silent_for_handler {
                eprintln!("\n{}", style("Forced exit").red().bold());
            }
            std::process::exit(130);
        }
        if !silent_for_handler {
            eprintln!(
                "\n{}",
                style("Cancelling... Press Ctrl+C again to force exit").yellow()
            );
        }
    })?;

    match cli.command {
        Commands::Generate {
            image,
            output,
            platform_ids,
            sector_size,
            block_size,
            anti_theft_version,
            os_version,
            excluded_partitions,
            max_blank_blocks,
            flash_update_version,
            device_targets,
            digest,
        } => commands::generate::execute(commands::generate::GenerateArgs {
            image,
            output,
            platform_ids,
            sector_size,
            block_size,
            anti_theft_version,
            os_version,
            excluded_partitions,
            max_blank_blocks,
            flash_update_version,
            device_targets,
            digest,
            settings,
            cancel_flag,
            silent,
            verbose: cli.verbose,
        }),
        Commands::Port {
            source,
            output,
            metadata_from,
        } => commands::port::execute(source, output, metadata_from, cancel_flag, silent),
        Commands::Inspect { container, json } => {
            commands::inspect::execute(&container, json, silent)
        }
        Commands::Verify { container } => {
            commands::verify::execute(&container, cancel_flag, silent)
        }
        Commands::Extract {
            container,
            partition,
            output,
            store,
        } => commands::extract::execute(&container, &partition, &output, store, cancel_flag, silent),
        Commands::Partitions {
            image,
            sector_size,
            json,
        } => commands::partitions::execute(&image, sector_size, json, silent),
        Commands::Config { init, path, json } => {
            commands::config::execute(commands::config::ConfigArgs {
                init,
                path,
                json,
                silent: cli.silent,
                config_file: cli.config,
            })
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
        Commands::Mangen { out_dir } => {
            let cmd = Cli::command();
            let out_path = std::path::Path::new(&out_dir);
            std::fs::create_dir_all(out_path)?;

            let man = Man::new(cmd.clone());
            let mut buffer = Vec::new();
            man.render(&mut buffer)?;
            std::fs::write(out_path.join("flashpack.1"), buffer)?;
            if !silent {
                println!("Generated: {}/flashpack.1", out_dir);
            }

            for subcommand in cmd.get_subcommands() {
                let name = subcommand.get_name();
                // Skip hidden commands and meta commands
                if subcommand.is_hide_set()
                    || name == "completions"
                    || name == "mangen"
                    || name == "help"
                {
                    continue;
                }

                let man = Man::new(subcommand.clone());
                let mut buffer = Vec::new();
                man.render(&mut buffer)?;
                let filename = format!("flashpack-{}.1", name);
                std::fs::write(out_path.join(&filename), buffer)?;
                if !silent {
                    println!("Generated: {}/{}", out_dir, filename);
                }
            }

            if !silent {
                println!(
                    "\nInstall with: sudo cp {}/*.1 /usr/local/share/man/man1/",
                    out_dir
                );
            }
            Ok(())
        }
    }
}
