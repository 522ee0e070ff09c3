use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE: &str = "eduassist.sqlite3";
const DB_ENTRY: &str = "db/eduassist.sqlite3";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

pub const BUNDLE_FORMAT: &str = "eduassist-workspace-v1";
pub const BARE_SQLITE_FORMAT: &str = "sqlite3";

/// Contents of `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    exported_at: String,
    db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Writes a zip holding the manifest and a copy of the workspace database.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.display());
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.display()))?;

    let manifest = Manifest {
        format: BUNDLE_FORMAT.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        db_sha256: sha256_hex(&db_bytes),
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let out = File::create(out_path)
        .with_context(|| format!("failed to create bundle {}", out_path.display()))?;
    write_bundle(out, &manifest, &db_bytes)?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: 2,
        db_sha256: manifest.db_sha256,
    })
}

fn write_bundle<W: Write + std::io::Seek>(
    out: W,
    manifest: &Manifest,
    db_bytes: &[u8],
) -> anyhow::Result<()> {
    let mut zip = ZipWriter::new(out);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)?;
    serde_json::to_writer_pretty(&mut zip, manifest).context("failed to write manifest")?;
    zip.start_file(DB_ENTRY, opts)?;
    zip.write_all(db_bytes).context("failed to write database entry")?;
    zip.finish().context("failed to finalize bundle")?;
    Ok(())
}

/// Reads a bundle and returns the database bytes once the manifest format
/// and checksum check out.
fn read_verified_bundle(in_path: &Path) -> anyhow::Result<Vec<u8>> {
    let file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(file).context("invalid zip archive")?;

    let manifest: Manifest = {
        let entry = archive
            .by_name(MANIFEST_ENTRY)
            .context("bundle missing manifest.json")?;
        serde_json::from_reader(entry).context("manifest.json is invalid")?
    };
    if manifest.format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .with_context(|| format!("bundle missing {}", DB_ENTRY))?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;

    let expected = manifest.db_sha256.to_ascii_lowercase();
    let actual = sha256_hex(&db_bytes);
    if actual != expected {
        bail!(
            "database checksum mismatch: expected {}, got {}",
            expected,
            actual
        );
    }
    Ok(db_bytes)
}

/// Writes to a sibling temp file, then renames it over `dst`.
fn replace_database(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = dst.with_extension("sqlite3.importing");
    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        f.write_all(bytes)
            .and_then(|_| f.sync_all())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
    }
    if dst.exists() {
        std::fs::remove_file(dst)
            .with_context(|| format!("failed to remove existing database {}", dst.display()))?;
    }
    std::fs::rename(&tmp, dst)
        .with_context(|| format!("failed to move database into {}", dst.display()))?;
    Ok(())
}

fn starts_with_zip_magic(path: &Path) -> anyhow::Result<bool> {
    let mut head = [0u8; 4];
    let mut f =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    match f.read_exact(&mut head) {
        Ok(()) => Ok(head == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("failed to read file signature"),
    }
}

/// Replaces the workspace database with the one in `in_path`. Zip bundles
/// must carry a matching manifest and checksum; anything else is taken as a
/// bare SQLite file.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;
    let dst = workspace_path.join(DB_FILE);

    let (bytes, detected) = if starts_with_zip_magic(in_path)? {
        (read_verified_bundle(in_path)?, BUNDLE_FORMAT)
    } else {
        let bytes = std::fs::read(in_path)
            .with_context(|| format!("failed to read {}", in_path.display()))?;
        (bytes, BARE_SQLITE_FORMAT)
    };
    replace_database(&dst, &bytes)?;

    Ok(ImportSummary {
        bundle_format_detected: detected.to_string(),
    })
}
