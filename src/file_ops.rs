//! Text and file encryption/decryption operations
//!
//! This is the shell around the codec: it reads inputs and passphrases,
//! applies the iteration policy, names outputs and writes them safely. It
//! never prints; advisories are handed back in a [`Report`] for the caller
//! to render.

use crate::codec;
use crate::error::{BitblockError, ErrorCategory, ErrorKind, Result};
use crate::iterations::{self, Advisory};
use crate::package::{self, EncryptedPackage, FILE_SUFFIX};
use crate::passphrase::PassphraseReader;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Output name used when a package does not say what it was.
pub const UNNAMED_OUTPUT: &str = "decrypted.bin";

/// Non-fatal side information from a shell operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// Iteration-count notices, in the order they arose.
    pub advisories: Vec<Advisory>,
    /// File written by the operation, if any.
    pub written: Option<PathBuf>,
}

impl Report {
    fn note(&mut self, advisory: Option<Advisory>) {
        self.advisories.extend(advisory);
    }
}

/// Encrypt text (or any bytes) into a pretty-printed JSON package.
///
/// `iterations` is the raw user input; see [`iterations::resolve_input`].
/// Advisories are added to `report` as they arise, so they survive a failure.
pub fn encrypt_text(
    plaintext: &[u8],
    iterations: Option<&str>,
    passphrase_reader: &mut dyn PassphraseReader,
    report: &mut Report,
) -> Result<String> {
    let clamped = iterations::resolve_input(iterations);
    report.note(clamped.advisory);

    let passphrase = passphrase_reader.read_non_empty()?;
    debug!(
        bytes = plaintext.len(),
        iterations = clamped.iterations,
        "encrypting text"
    );
    let pkg = codec::encrypt(plaintext, &passphrase, clamped.iterations)
        .map_err(|e| e.with_context("encryption failed"))?;
    pkg.to_json()
}

/// Decrypt a JSON package back into bytes.
///
/// A capped iteration count is noted in `report` before decryption starts.
pub fn decrypt_text(
    package_json: &str,
    passphrase_reader: &mut dyn PassphraseReader,
    report: &mut Report,
) -> Result<Zeroizing<Vec<u8>>> {
    let pkg = EncryptedPackage::from_json(package_json)?;
    report.note(codec::check_header(&pkg)?.advisory);

    let passphrase = passphrase_reader.read_non_empty()?;
    debug!(iterations = pkg.iters, "decrypting text package");
    let decrypted =
        codec::decrypt(&pkg, &passphrase).map_err(|e| e.with_context("failed to decrypt"))?;
    Ok(decrypted.plaintext)
}

/// Encrypt a file into a `.secure.json` package
///
/// The package records the input's file name so decryption can restore it.
/// Without `output_path` the package is written next to the input as
/// `<input>.secure.json`, which must not exist yet; an explicit
/// `output_path` is overwritten.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn encrypt_file(
    input_path: &Path,
    output_path: Option<&Path>,
    iterations: Option<&str>,
    passphrase_reader: &mut dyn PassphraseReader,
    report: &mut Report,
) -> Result<()> {
    let clamped = iterations::resolve_input(iterations);
    report.note(clamped.advisory);

    let (output_path, overwrite) = match output_path {
        Some(path) => (path.to_path_buf(), Overwrite::Allow),
        None => (refuse_existing(default_encrypted_path(input_path))?, Overwrite::Refuse),
    };

    let plaintext = Zeroizing::new(fs::read(input_path).map_err(|e| read_error(input_path, e))?);
    let passphrase = passphrase_reader.read_non_empty()?;

    debug!(
        path = %input_path.display(),
        bytes = plaintext.len(),
        iterations = clamped.iterations,
        "encrypting file"
    );
    let mut pkg = codec::encrypt(&plaintext, &passphrase, clamped.iterations)
        .map_err(|e| e.with_context("encryption failed"))?;
    if let Some(name) = input_path.file_name() {
        pkg = pkg.with_filename(name.to_string_lossy());
    }

    let json = pkg.to_json()?;
    write_secure(&output_path, json.as_bytes(), overwrite)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    info!(path = %output_path.display(), "wrote encrypted package");

    report.written = Some(output_path);
    Ok(())
}

/// Decrypt a `.secure.json` package file
///
/// Without `output_path` the plaintext is written next to the package, named
/// after the package's `filename` (see [`default_decrypted_path`]). A derived
/// name never overwrites an existing file; an explicit `output_path` does.
/// A capped iteration count is noted in `report` before decryption starts.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn decrypt_file(
    input_path: &Path,
    output_path: Option<&Path>,
    passphrase_reader: &mut dyn PassphraseReader,
    report: &mut Report,
) -> Result<()> {
    let json_bytes = fs::read(input_path).map_err(|e| read_error(input_path, e))?;
    let json = String::from_utf8(json_bytes).map_err(|e| {
        BitblockError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedPackage,
            "input file is not valid UTF-8",
            e,
        )
    })?;
    let pkg = EncryptedPackage::from_json(&json)
        .map_err(|e| e.with_context(format!("failed to read package {}", input_path.display())))?;
    report.note(codec::check_header(&pkg)?.advisory);

    let (output_path, overwrite) = match output_path {
        Some(path) => (path.to_path_buf(), Overwrite::Allow),
        None => (
            refuse_existing(default_decrypted_path(input_path, &pkg))?,
            Overwrite::Refuse,
        ),
    };

    let passphrase = passphrase_reader.read_non_empty()?;
    debug!(path = %input_path.display(), iterations = pkg.iters, "decrypting file");
    let decrypted =
        codec::decrypt(&pkg, &passphrase).map_err(|e| e.with_context("failed to decrypt"))?;

    write_secure(&output_path, &decrypted.plaintext, overwrite)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    info!(path = %output_path.display(), "wrote decrypted file");

    report.written = Some(output_path);
    Ok(())
}

/// Whether a write may replace an existing file at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overwrite {
    Allow,
    Refuse,
}

fn refusal(path: &Path) -> BitblockError {
    BitblockError::invalid_input(format!(
        "refusing to overwrite existing file {}; choose an output with -o",
        path.display()
    ))
}

/// Fail early, before the passphrase is asked for, if a derived name is taken.
fn refuse_existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        return Err(refusal(&path));
    }
    Ok(path)
}

/// `<input>.secure.json`, next to the input.
pub fn default_encrypted_path(input_path: &Path) -> PathBuf {
    let mut name = input_path.as_os_str().to_owned();
    name.push(FILE_SUFFIX);
    PathBuf::from(name)
}

/// Where a decrypted package lands when no output is given.
///
/// The package's `filename` is untrusted: only its final path component is
/// used, with any `.secure.json` suffix removed. Missing or unusable names
/// fall back to [`UNNAMED_OUTPUT`]. The result sits in the package's
/// directory.
pub fn default_decrypted_path(input_path: &Path, pkg: &EncryptedPackage) -> PathBuf {
    let name = pkg
        .filename
        .as_deref()
        .and_then(|f| Path::new(f).file_name())
        .and_then(|f| f.to_str())
        .map(package::strip_file_suffix)
        .filter(|f| !f.is_empty())
        .unwrap_or(UNNAMED_OUTPUT);

    match input_path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Read an operation's input from `path`, or from stdin when there is none.
///
/// `stdin_has_passphrase` says the passphrase is being piped in; the input
/// cannot share the stream, so a missing `path` is then an error.
pub fn read_input(path: Option<&Path>, stdin_has_passphrase: bool) -> Result<Vec<u8>> {
    if let Some(path) = path {
        return fs::read(path).map_err(|e| read_error(path, e));
    }
    if stdin_has_passphrase {
        return Err(BitblockError::invalid_input(
            "cannot read both the passphrase and the input from stdin; give the input with -i",
        ));
    }
    let mut data = Vec::new();
    io::stdin()
        .read_to_end(&mut data)
        .map_err(|e| io_error("failed to read from stdin", e))?;
    debug!(bytes = data.len(), "read input from stdin");
    Ok(data)
}

/// Write a file atomically with secure permissions (0o600 on Unix)
///
/// The contents go to a tempfile in the destination directory, which is
/// fsynced and then renamed over `path`. Readers see either the old file or
/// the complete new one.
pub fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    write_secure(path, contents, Overwrite::Allow)
}

/// Like [`write_file_secure`], but fails with [`ErrorKind::InvalidInput`] if
/// `path` exists when the tempfile is moved into place.
pub fn create_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    write_secure(path, contents, Overwrite::Refuse)
}

fn write_secure(path: &Path, contents: &[u8], overwrite: Overwrite) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        BitblockError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to create tempfile in {}", dir.display()),
            e,
        )
    })?;

    temp_file.write_all(contents).map_err(|e| io_error("failed to write to tempfile", e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| io_error("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_error("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| io_error("failed to set tempfile permissions", e))?;
    }

    let persisted = match overwrite {
        Overwrite::Allow => temp_file.persist(path),
        Overwrite::Refuse => temp_file.persist_noclobber(path),
    };
    persisted.map_err(|e| {
        if overwrite == Overwrite::Refuse && e.error.kind() == io::ErrorKind::AlreadyExists {
            return refusal(path);
        }
        BitblockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn io_error(msg: &str, err: io::Error) -> BitblockError {
    BitblockError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

fn read_error(path: &Path, err: io::Error) -> BitblockError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    BitblockError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
