//! Passphrase sources for the shell

use crate::error::{BitblockError, ErrorCategory, ErrorKind, Result};
use std::io::Read;
use zeroize::Zeroizing;

/// Trait for reading passphrases from various sources
pub trait PassphraseReader {
    /// Read a passphrase as arbitrary bytes (not necessarily UTF-8)
    ///
    /// Returns the passphrase wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>>;

    /// Like [`read_passphrase`](Self::read_passphrase), but an empty
    /// passphrase is an [`ErrorKind::InvalidInput`] error.
    fn read_non_empty(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let passphrase = self.read_passphrase()?;
        if passphrase.is_empty() {
            return Err(BitblockError::invalid_input("Enter a passphrase."));
        }
        Ok(passphrase)
    }
}

/// Returns a fixed passphrase (for testing)
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<Vec<u8>>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: Vec<u8>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new((*self.passphrase).clone()))
    }
}

/// Reads a passphrase from any io::Read source, e.g. stdin.
///
/// Everything up to EOF is the passphrase, except that one trailing line
/// ending (`\n` or `\r\n`) is dropped so `echo secret |` works as expected.
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            BitblockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        if data.ends_with(b"\n") {
            data.pop();
            if data.ends_with(b"\r") {
                data.pop();
            }
        }
        Ok(data)
    }
}

const PROMPT: &str = "Passphrase (bitblock): ";

/// Reads passphrase from the controlling terminal with no echo
///
/// The terminal is opened directly, so stdin stays free for piped input.
#[derive(Default)]
pub struct TerminalPassphraseReader;

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    /// Read passphrase from terminal.
    ///
    /// Note: Terminal input is limited to UTF-8 due to rpassword library constraints.
    /// For non-UTF-8 passphrases, use --passphrase-stdin instead.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        // rpassword hands back a plain String; move it straight into a
        // zeroizing buffer.
        let passphrase = rpassword::prompt_password(PROMPT).map_err(|e| {
            BitblockError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal (use --passphrase-stdin)",
                e,
            )
        })?;

        Ok(Zeroizing::new(passphrase.into_bytes()))
    }
}
