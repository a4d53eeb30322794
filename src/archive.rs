use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::db;
use crate::evidence_store;

const MANIFEST_ENTRY: &str = "manifest.json";
const RECORDS_ENTRY: &str = "records.json";
pub const BUNDLE_FORMAT_V1: &str = "schooldesk-evidence-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub record_count: usize,
    pub object_count: usize,
}

struct BundleRecord {
    row: serde_json::Value,
    storage_ids: Vec<String>,
}

/// Write a review bundle for one teacher: a manifest, the teacher's progress rows,
/// and every evidence object those rows reference.
pub fn export_evidence_bundle(
    workspace: &Path,
    conn: &Connection,
    teacher_id: &str,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let records = load_records(conn, teacher_id)?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "teacherId": teacher_id,
        "exportedAt": db::now_iso(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    let rows: Vec<&serde_json::Value> = records.iter().map(|r| &r.row).collect();
    zip.start_file(RECORDS_ENTRY, opts)
        .context("failed to start records entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&json!({ "records": rows }))
            .context("failed to serialize records")?
            .as_bytes(),
    )
    .context("failed to write records entry")?;

    let mut object_count = 0usize;
    for record in &records {
        for storage_id in &record.storage_ids {
            let src = evidence_store::object_path(workspace, storage_id);
            if !src.is_file() {
                return Err(anyhow!("evidence object missing from store: {}", storage_id));
            }
            zip.start_file(format!("objects/{}", storage_id), opts)
                .with_context(|| format!("failed to start object entry {}", storage_id))?;
            let mut obj = File::open(&src)
                .with_context(|| format!("failed to open object {}", src.to_string_lossy()))?;
            std::io::copy(&mut obj, &mut zip)
                .with_context(|| format!("failed to write object entry {}", storage_id))?;
            object_count += 1;
        }
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        record_count: records.len(),
        object_count,
    })
}

fn load_records(conn: &Connection, teacher_id: &str) -> anyhow::Result<Vec<BundleRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, lesson_id, assignment_id, curriculum_id, campus_id, grade_code,
                    quarter, status, evidence_storage_id, evidence_content_type,
                    photo_storage_id, scheduled_date, completed_at, is_verified, version
             FROM lesson_progress
             WHERE teacher_id = ?
             ORDER BY created_at, id",
        )
        .context("failed to prepare progress query")?;
    let records = stmt
        .query_map([teacher_id], |r| {
            let evidence_storage_id: Option<String> = r.get(8)?;
            let photo_storage_id: Option<String> = r.get(10)?;
            let mut storage_ids = Vec::new();
            if let Some(id) = evidence_storage_id.clone() {
                storage_ids.push(id);
            }
            if let Some(id) = photo_storage_id.clone() {
                storage_ids.push(id);
            }
            Ok(BundleRecord {
                row: json!({
                    "id": r.get::<_, String>(0)?,
                    "lessonId": r.get::<_, String>(1)?,
                    "assignmentId": r.get::<_, String>(2)?,
                    "curriculumId": r.get::<_, String>(3)?,
                    "campusId": r.get::<_, String>(4)?,
                    "gradeCode": r.get::<_, Option<String>>(5)?,
                    "quarter": r.get::<_, i64>(6)?,
                    "status": r.get::<_, String>(7)?,
                    "evidenceStorageId": evidence_storage_id,
                    "evidenceContentType": r.get::<_, Option<String>>(9)?,
                    "photoStorageId": photo_storage_id,
                    "scheduledDate": r.get::<_, Option<String>>(11)?,
                    "completedAt": r.get::<_, Option<String>>(12)?,
                    "isVerified": r.get::<_, i64>(13)? != 0,
                    "version": r.get::<_, i64>(14)?,
                }),
                storage_ids,
            })
        })
        .context("failed to run progress query")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read progress rows")?;
    Ok(records)
}
