//! `auth-convert from to`: imports the legacy per-player directory layout
//! (`auth/<name>/{salt,verifier,last_server,timestamp}`, one file per field,
//! as written by the original's `AuthFiles` backend) into this proxy's
//! single-file JSON [`FileAuthBackend`] store.
//!
//! Grounded on `auth_files.go` and `cmd/mt-auth-convert/convert.go`.

use std::path::PathBuf;

use clap::Parser;

use voxelmux::auth::{AuthBackend, FileAuthBackend};

#[derive(Parser, Debug)]
#[command(name = "auth-convert", about = "Convert a legacy auth store into this proxy's JSON store")]
struct Args {
    /// Path to the legacy `auth/` directory (one subdirectory per player).
    from: PathBuf,

    /// Path to the JSON file the new `FileAuthBackend` store is written to.
    to: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let dst = FileAuthBackend::load(&args.to).expect("failed to open destination store");
    let mut converted = 0usize;

    let entries = std::fs::read_dir(&args.from).unwrap_or_else(|e| {
        eprintln!("cannot read {}: {e}", args.from.display());
        std::process::exit(1);
    });

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let salt = match std::fs::read(dir.join("salt")) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let verifier = match std::fs::read(dir.join("verifier")) {
            Ok(v) => v,
            Err(_) => continue,
        };

        if let Err(e) = dst.set_passwd(name, &salt, &verifier).await {
            eprintln!("skipping {name}: {e}");
            continue;
        }

        if let Ok(srv) = std::fs::read_to_string(dir.join("last_server")) {
            let srv = srv.trim();
            if !srv.is_empty() {
                let _ = dst.set_last_srv(name, srv).await;
            }
        }

        converted += 1;
    }

    println!("converted {converted} player(s) into {}", args.to.display());
}
