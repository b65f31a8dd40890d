//! `archivist cid`

use super::output::format_size;
use anyhow::{Context, Result};
use archivist_car::ContentAddresser;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug)]
pub struct CidArgs {
    pub file: PathBuf,
    pub car: Option<PathBuf>,
    pub json: bool,
}

#[derive(Serialize)]
struct CidOutput {
    file: PathBuf,
    cid: String,
    sha256: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    car: Option<PathBuf>,
}

pub fn run(args: CidArgs) -> Result<()> {
    let (address, container) = ContentAddresser::default()
        .derive_path(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    if let Some(dest) = &args.car {
        container
            .copy_to(dest)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
    }

    if args.json {
        let out = CidOutput {
            file: args.file,
            cid: address.cid.to_string(),
            sha256: address.sha256,
            size: address.size,
            car: args.car,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", address.cid);
    eprintln!("  sha256  {}", address.sha256);
    eprintln!("  size    {}", format_size(address.size));
    if let Some(dest) = &args.car {
        eprintln!("  car     {} ({})", dest.display(), format_size(container.len()));
    }
    Ok(())
}
