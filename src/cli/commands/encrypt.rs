use anyhow::Context;
use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::crypto::{decode_key, AesGcmEncryptionProvider, SymmetricStringEncryptionProvider};

/// Produce the stored form of an ODS connection string
pub async fn handle(plaintext: String, output_format: OutputFormat) -> anyhow::Result<()> {
    let encoded = crate::config::config()
        .app
        .encryption_key
        .as_deref()
        .context("ENCRYPTION_KEY must be set")?;
    let key = decode_key(encoded)?;
    let cipher_text = AesGcmEncryptionProvider.encrypt(&plaintext, &key)?;

    match output_format {
        OutputFormat::Json => output_success(
            &output_format,
            "Encrypted connection string",
            Some(json!({ "connection_string": cipher_text })),
        ),
        OutputFormat::Text => {
            println!("{}", cipher_text);
            Ok(())
        }
    }
}
