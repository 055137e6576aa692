use anyhow::Result;
use std::path::Path;

use grocer_core::keys::{append_key, generate_key};

/// Generate an access key and append it to the keys file. A running server
/// picks it up on restart.
pub(crate) fn cmd_key_new(keys_path: &Path, json: bool) -> Result<()> {
    let key = generate_key();
    append_key(keys_path, &key)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "key": key, "keys_file": keys_path.display().to_string() })
        );
    } else {
        println!("{key}");
        eprintln!("Added to {}", keys_path.display());
    }
    Ok(())
}
