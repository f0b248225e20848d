use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// Use of Internal is never a guarantee that the error was not caused by
    /// the user, only that the code cannot tell.
    Internal,

    /// The user provided invalid input, a package we cannot use, or the
    /// wrong passphrase.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Caller-side validation failed: empty passphrase, missing input,
    /// iteration count out of range.
    InvalidInput,
    /// The package declares a cipher suite other than the one we implement.
    UnsupportedAlgorithm,
    /// The package declares a format version other than 1.
    UnsupportedVersion,
    /// The package is not valid JSON, is missing fields, or carries
    /// undecodable base64 or wrongly sized salt/nonce.
    MalformedPackage,
    /// Authentication failed. Deliberately covers both a wrong passphrase
    /// and corrupted or tampered-with data.
    DecryptionFailed,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// PBKDF2 key derivation failed.
    KeyDerivation,
    /// AES-GCM failed to seal data, or the random source failed.
    Cipher,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct BitblockError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag. Code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl BitblockError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Shorthand for the caller-side validation failures the shell reports.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::User, ErrorKind::InvalidInput, msg)
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// True if this error, or any error it wraps, carries `kind`.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        if self.kind == Some(kind) {
            return true;
        }
        self.source
            .as_deref()
            .and_then(|s| s.downcast_ref::<BitblockError>())
            .is_some_and(|inner| inner.has_kind(kind))
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    ///
    /// Category and kind carry over so callers can still branch on the
    /// outermost error.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// Renders the message followed by every source in the chain, separated by ": ".
    pub fn display_chain(&self) -> String {
        let mut out = self.msg.clone();
        let mut next = StdError::source(self);
        while let Some(err) = next {
            out.push_str(": ");
            out.push_str(&err.to_string());
            next = err.source();
        }
        out
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BitblockError>;
