//! Crash-dump discovery for the `list_dumps` tool.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

#[derive(Clone, Debug, Serialize)]
pub struct DumpFileInfo {
    pub path: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// Recursively collect `*.dmp` files under `directory`, newest first.
/// Symlinks are skipped; unreadable subdirectories are ignored.
pub fn list_dump_files(directory: &Path) -> Result<Vec<DumpFileInfo>> {
    if !directory.is_dir() {
        bail!("not a directory: {}", directory.display());
    }

    let mut dumps = Vec::new();
    let mut stack = vec![directory.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dmp"))
            {
                continue;
            }

            let metadata = entry
                .metadata()
                .with_context(|| format!("failed to stat {}", path.display()))?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            dumps.push(DumpFileInfo {
                path: path.to_string_lossy().into_owned(),
                size_bytes: metadata.len(),
                modified,
            });
        }
    }

    dumps.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(dumps)
}

const MINIDUMP_MAGIC: &[u8] = b"MDMP";
const KERNEL_DUMP_MAGICS: &[&[u8]] = &[b"PAGEDUMP", b"PAGEDU64"];

/// Cheap sanity check before handing a file to the debugger: user-mode
/// minidumps start with `MDMP`, kernel dumps with `PAGEDUMP`/`PAGEDU64`.
pub fn validate_dump_header(path: &Path) -> Result<()> {
    use std::io::Read;

    let mut header = [0u8; 8];
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let read = file
        .read(&mut header)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if read >= MINIDUMP_MAGIC.len() && header.starts_with(MINIDUMP_MAGIC) {
        return Ok(());
    }
    if KERNEL_DUMP_MAGICS
        .iter()
        .any(|magic| read >= magic.len() && header.starts_with(magic))
    {
        return Ok(());
    }

    bail!(
        "{} does not look like a Windows crash dump (unknown header)",
        path.display()
    )
}

/// Render a byte count the way directory listings do.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Human-readable listing used by the CLI subcommand and the MCP tool.
pub fn format_dump_listing(dumps: &[DumpFileInfo]) -> String {
    if dumps.is_empty() {
        return "No dump files found.\n".to_string();
    }

    let mut out = format!("{:<19}  {:>10}  PATH\n", "MODIFIED", "SIZE");
    for dump in dumps {
        out.push_str(&format!(
            "{:<19}  {:>10}  {}\n",
            dump.modified.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(dump.size_bytes),
            dump.path,
        ));
    }
    out
}
