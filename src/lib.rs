//! bitblock - Passphrase-based text and file encryption using PBKDF2 and AES-GCM

#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod file_ops;
pub mod iterations;
pub mod package;
pub mod passphrase;
