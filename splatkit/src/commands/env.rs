//! Environment management commands: status, install, clean, path.
//!
//! The environment lives in `~/.splatkit/env` (or `$SPLATKIT_ENV_DIR`); model
//! weights live beside it in `models/` and survive `clean`.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use splatkit_runtime::RuntimeLayout;

use super::{report, service};

/// `splatkit env status`
pub fn cmd_status(json: bool) -> Result<()> {
    let svc = service(None)?;
    let status = svc.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    let mark = |ok: bool| if ok { "✓" } else { "✗" };
    eprintln!("{} Python runtime   {}", mark(status.python_installed), status.interpreter.display());
    eprintln!("{} Packages", mark(status.packages_installed));
    eprintln!("{} Model weights    {}", mark(status.checkpoint_installed), status.checkpoint.display());
    eprintln!();
    eprintln!("{}", status.message);
    Ok(())
}

/// `splatkit env install`
pub fn cmd_install() -> Result<()> {
    let svc = service(None)?;
    let handle = svc.start_install().map_err(report)?;

    let cancel = handle.cancel_token();
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, cancelling install...");
        cancel.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut last_message = String::new();
    let result = handle.wait(|progress| {
        if progress.message != last_message {
            eprintln!(
                "[{:>3.0}%] ({}/{}) {}",
                progress.percent, progress.stage_index, progress.stage_count, progress.message
            );
            last_message.clone_from(&progress.message);
        }
    });
    let installed = result.map_err(report)?;

    eprintln!();
    if installed.executed.is_empty() {
        eprintln!("✓ Environment already installed");
    } else {
        eprintln!(
            "✓ Installed {} stage(s), {} already done",
            installed.executed.len(),
            installed.skipped.len()
        );
    }
    Ok(())
}

/// `splatkit env path`
pub fn cmd_path() -> Result<()> {
    let svc = service(None)?;
    let layout = svc.layout();
    println!("env_root      {}", layout.env_root.display());
    println!("interpreter   {}", layout.interpreter.display());
    println!("site_packages {}", layout.site_packages.display());
    println!("inference     {}", layout.inference_dir.display());
    println!("checkpoint    {}", layout.checkpoint.display());
    println!("output        {}", layout.output_dir.display());
    Ok(())
}

/// Paths `clean` removes: the environment, staging leftovers and partial downloads.
fn clean_targets(layout: &RuntimeLayout) -> Vec<(PathBuf, u64)> {
    [
        layout.env_root.clone(),
        layout.staging_dir(),
        layout.checkpoint_partial(),
    ]
    .into_iter()
    .filter(|p| p.exists())
    .map(|p| {
        let size = if p.is_dir() {
            dir_size(&p)
        } else {
            p.metadata().map(|m| m.len()).unwrap_or(0)
        };
        (p, size)
    })
    .collect()
}

/// `splatkit env clean`
pub fn cmd_clean(dry_run: bool, force: bool) -> Result<()> {
    let svc = service(None)?;
    let layout = svc.layout();
    if svc.is_installing() {
        anyhow::bail!("An installation is running; wait for it to finish first.");
    }

    let entries = clean_targets(layout);
    if entries.is_empty() {
        eprintln!("Nothing to clean at {}", layout.env_root.display());
        return Ok(());
    }
    let total_size: u64 = entries.iter().map(|(_, size)| size).sum();

    eprintln!("🗂  Environment files:");
    eprintln!();
    for (path, size) in &entries {
        eprintln!("  • {} ({})", path.display(), format_size(*size));
    }
    eprintln!();
    eprintln!("Total: {}", format_size(total_size));

    if dry_run {
        eprintln!();
        eprintln!("(Dry run: no files removed. Remove --dry-run to delete.)");
        return Ok(());
    }

    if !force {
        eprint!("\nRemove the environment? Model weights are kept. [y/N] ");
        std::io::stderr().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            eprintln!("Cancelled.");
            return Ok(());
        }
    }

    let (removed, errors) = remove_all(&entries);
    eprintln!();
    if errors == 0 {
        eprintln!("✓ Removed {} path(s), freed {}", removed, format_size(total_size));
    } else {
        eprintln!("⚠ Removed {}/{} paths ({} errors)", removed, entries.len(), errors);
    }
    Ok(())
}

fn remove_all(entries: &[(PathBuf, u64)]) -> (usize, usize) {
    let mut removed = 0;
    let mut errors = 0;
    for (path, _) in entries {
        let outcome = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match outcome {
            Ok(()) => removed += 1,
            Err(e) => {
                eprintln!("  ✗ Failed to remove {}: {}", path.display(), e);
                errors += 1;
            }
        }
    }
    (removed, errors)
}

/// Compute total size of a directory recursively.
fn dir_size(path: &Path) -> u64 {
    let mut total: u64 = 0;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                total += dir_size(&p);
            } else if let Ok(meta) = p.metadata() {
                total += meta.len();
            }
        }
    }
    total
}

/// Format byte size to human-readable string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
