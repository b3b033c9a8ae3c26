//! Workspace snapshots: a zip holding the SQLite file plus a manifest that
//! records its SHA-256, or a bare SQLite file on import.

use crate::db::DB_FILE_NAME;
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_FORMAT_V1: &str = "gradebook-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

const MANIFEST_NAME: &str = "manifest.json";
const DB_NAME_IN_BUNDLE: &str = "db/gradebook.sqlite3";
const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";
const ZIP_HEADER: &[u8] = b"PK\x03\x04";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    format: String,
    app_version: String,
    exported_at: String,
    db_sha256: String,
}

impl BundleManifest {
    fn for_db(db_bytes: &[u8]) -> Self {
        Self {
            format: BUNDLE_FORMAT_V1.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: crate::db::now_stamp(),
            db_sha256: hex_sha256(db_bytes),
        }
    }

    fn verify(&self, db_bytes: &[u8]) -> anyhow::Result<()> {
        ensure!(
            self.format == BUNDLE_FORMAT_V1,
            "unsupported bundle format: {}",
            self.format
        );
        let actual = hex_sha256(db_bytes);
        ensure!(
            actual.eq_ignore_ascii_case(&self.db_sha256),
            "database checksum mismatch (manifest {}, actual {})",
            self.db_sha256,
            actual
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn hex_sha256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn shown(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    ensure!(db_path.is_file(), "no database in workspace: {}", shown(&db_path));
    let db_bytes =
        std::fs::read(&db_path).with_context(|| format!("reading {}", shown(&db_path)))?;
    let manifest = BundleManifest::for_db(&db_bytes);

    if let Some(dir) = out_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", shown(dir)))?;
    }
    let file = File::create(out_path).with_context(|| format!("creating {}", shown(out_path)))?;
    let mut writer = ZipWriter::new(file);
    let deflate = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest_json =
        serde_json::to_vec_pretty(&manifest).context("encoding bundle manifest")?;
    let entries = [
        (MANIFEST_NAME, manifest_json.as_slice()),
        (DB_NAME_IN_BUNDLE, db_bytes.as_slice()),
    ];
    for (name, body) in entries {
        writer
            .start_file(name, deflate)
            .with_context(|| format!("adding {} to bundle", name))?;
        writer
            .write_all(body)
            .with_context(|| format!("writing {} to bundle", name))?;
    }
    writer.finish().context("closing bundle")?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        db_sha256: manifest.db_sha256,
    })
}

/// Restores a workspace database from a bundle or a bare SQLite file.
/// Any open connection to the workspace must be dropped first; the existing
/// database is only replaced once the incoming bytes have been checked.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let header = file_header(in_path)?;
    let (db_bytes, detected) = if header.starts_with(SQLITE_HEADER) {
        let bytes = std::fs::read(in_path).with_context(|| format!("reading {}", shown(in_path)))?;
        (bytes, RAW_SQLITE_FORMAT)
    } else if header.starts_with(ZIP_HEADER) {
        (read_verified_bundle(in_path)?, BUNDLE_FORMAT_V1)
    } else {
        bail!("unrecognised backup file: {}", shown(in_path));
    };

    install_db(workspace_path, &db_bytes)?;
    Ok(ImportSummary {
        bundle_format_detected: detected.to_string(),
    })
}

fn read_verified_bundle(path: &Path) -> anyhow::Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("opening {}", shown(path)))?;
    let mut archive = ZipArchive::new(file).context("not a readable zip archive")?;

    let mut raw_manifest = String::new();
    archive
        .by_name(MANIFEST_NAME)
        .context("bundle has no manifest.json")?
        .read_to_string(&mut raw_manifest)
        .context("reading manifest.json")?;
    let manifest: BundleManifest =
        serde_json::from_str(&raw_manifest).context("manifest.json is malformed")?;

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_NAME_IN_BUNDLE)
        .with_context(|| format!("bundle has no {}", DB_NAME_IN_BUNDLE))?
        .read_to_end(&mut db_bytes)
        .with_context(|| format!("extracting {}", DB_NAME_IN_BUNDLE))?;
    manifest.verify(&db_bytes)?;
    Ok(db_bytes)
}

/// Writes next to the target and renames over it.
fn install_db(workspace_path: &Path, db_bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("creating workspace {}", shown(workspace_path)))?;
    let target = workspace_path.join(DB_FILE_NAME);
    let staging = workspace_path.join(format!("{}.importing", DB_FILE_NAME));

    let mut out =
        File::create(&staging).with_context(|| format!("creating {}", shown(&staging)))?;
    out.write_all(db_bytes)
        .and_then(|_| out.sync_all())
        .with_context(|| format!("writing {}", shown(&staging)))?;
    drop(out);

    if target.exists() {
        std::fs::remove_file(&target).with_context(|| format!("removing {}", shown(&target)))?;
    }
    std::fs::rename(&staging, &target)
        .with_context(|| format!("moving restored database to {}", shown(&target)))?;
    Ok(())
}

fn file_header(path: &Path) -> anyhow::Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("opening {}", shown(path)))?;
    let mut header = Vec::with_capacity(SQLITE_HEADER.len());
    file.take(SQLITE_HEADER.len() as u64)
        .read_to_end(&mut header)
        .with_context(|| format!("reading header of {}", shown(path)))?;
    Ok(header)
}
