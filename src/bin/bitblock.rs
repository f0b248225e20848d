//! bitblock CLI - Passphrase-based text and file encryption
//!
//! Command-line interface for encrypting and decrypting text and files
//! using AES-256-GCM with PBKDF2-HMAC-SHA256 key derivation.

use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

use bitblock::error::{BitblockError, ErrorCategory, ErrorKind, Result};
use bitblock::file_ops::{self, Report};
use bitblock::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};

#[derive(Parser)]
#[command(name = "bitblock")]
#[command(version)]
#[command(about = "Passphrase-based text and file encryption.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt text into a JSON package printed to stdout
    EncryptText {
        /// Text to encrypt (default: read from --input or stdin)
        #[arg(short, long, conflicts_with = "input")]
        text: Option<String>,

        /// Path to a file holding the text to encrypt
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Write the package here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// PBKDF2 iteration count (10,000 to 10,000,000; default 250,000)
        #[arg(long, value_name = "N", env = "BITBLOCK_ITERATIONS")]
        iterations: Option<String>,
    },

    /// Decrypt a JSON package and print the text to stdout
    DecryptText {
        /// Path to the package (default: stdin)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Write the raw plaintext here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Encrypt a file into a .secure.json package
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the package to (default: <input>.secure.json)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// PBKDF2 iteration count (10,000 to 10,000,000; default 250,000)
        #[arg(long, value_name = "N", env = "BITBLOCK_ITERATIONS")]
        iterations: Option<String>,
    },

    /// Decrypt a .secure.json package back into a file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the package to decrypt
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the plaintext to (default: the original file name,
        /// next to the package)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let mut reader = get_passphrase_reader(cli.passphrase_stdin);
    let mut report = Report::default();
    let result = run(cli.command, cli.passphrase_stdin, &mut *reader, &mut report);

    // Advisories are shown even when the operation then failed.
    for advisory in &report.advisories {
        eprintln!("Warning: {}", advisory);
    }
    match result {
        Ok(()) => {
            if let Some(path) = &report.written {
                eprintln!("Done. Saved {}", path.display());
            }
        }
        Err(e) => {
            tracing::debug!(category = ?e.category, kind = ?e.kind, "operation failed");
            eprintln!("Error: {}", e.display_chain());
            process::exit(1);
        }
    }
}

fn run(
    command: Commands,
    passphrase_stdin: bool,
    reader: &mut dyn PassphraseReader,
    report: &mut Report,
) -> Result<()> {
    match command {
        Commands::EncryptText {
            text,
            input,
            output,
            iterations,
        } => {
            let plaintext = match text {
                Some(text) => text.into_bytes(),
                None => file_ops::read_input(input.as_deref(), passphrase_stdin)?,
            };
            let json = file_ops::encrypt_text(&plaintext, iterations.as_deref(), reader, report)?;
            report.written = emit(output.as_deref(), format!("{}\n", json).as_bytes())?;
            Ok(())
        }
        Commands::DecryptText { input, output } => {
            let raw = file_ops::read_input(input.as_deref(), passphrase_stdin)?;
            let json = String::from_utf8(raw).map_err(|e| {
                BitblockError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::MalformedPackage,
                    "package is not valid UTF-8",
                    e,
                )
            })?;
            let plaintext = file_ops::decrypt_text(&json, reader, report)?;
            report.written = match output {
                Some(path) => emit(Some(path.as_path()), &plaintext)?,
                None => {
                    let text = String::from_utf8_lossy(&plaintext);
                    emit(None, format!("{}\n", text).as_bytes())?
                }
            };
            Ok(())
        }
        Commands::Encrypt {
            input,
            output,
            iterations,
        } => file_ops::encrypt_file(
            &input,
            output.as_deref(),
            iterations.as_deref(),
            reader,
            report,
        ),
        Commands::Decrypt { input, output } => {
            file_ops::decrypt_file(&input, output.as_deref(), reader, report)
        }
    }
}

/// Write to `path` if given, else to stdout. Returns the path written.
fn emit(path: Option<&Path>, contents: &[u8]) -> Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            file_ops::write_file_secure(path, contents)
                .map_err(|e| e.with_context(format!("failed to write to {}", path.display())))?;
            Ok(Some(path.to_path_buf()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(contents)
                .and_then(|()| stdout.flush())
                .map_err(|e| {
                    BitblockError::with_kind_and_source(
                        ErrorCategory::Internal,
                        ErrorKind::Io,
                        "failed to write to stdout",
                        e,
                    )
                })?;
            Ok(None)
        }
    }
}

/// Diagnostics go to stderr, filtered by RUST_LOG (default: warnings only).
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn get_passphrase_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}
