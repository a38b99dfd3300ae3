//! Deployment report assembly and run-record persistence.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use codeaid_core::{CodeAidError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::readiness::ReadinessReport;
use crate::spec_gen::DeploymentSpec;
use crate::stage::DeployStage;
use crate::state::{DeploymentState, OperationEntry};

pub const RUN_RECORD_FILE: &str = "run.json";
pub const RUN_DIGEST_FILE: &str = "run.digest";

/// Persisted summary of one deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub service_name: String,
    pub spec: Option<DeploymentSpec>,
    pub operations: Vec<OperationEntry>,
    pub readiness: Option<ReadinessReport>,
    pub success: bool,
    pub failed_stage: Option<DeployStage>,
    pub recorded_at: DateTime<Utc>,
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write `<dir>/run.json` and its digest. Returns the record path.
pub fn write_run_record(record: &RunRecord, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let record_path = dir.join(RUN_RECORD_FILE);
    let digest_path = dir.join(RUN_DIGEST_FILE);
    let json = serde_json::to_vec_pretty(record)?;
    let digest = sha256_hex(&json);

    std::fs::write(&record_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(record_path)
}

/// Read and verify `<dir>/run.json` integrity.
pub fn read_run_record(dir: &Path) -> Result<RunRecord> {
    let json = std::fs::read(dir.join(RUN_RECORD_FILE))?;
    let digest = std::fs::read_to_string(dir.join(RUN_DIGEST_FILE))?;
    let actual = sha256_hex(&json);
    if digest.trim() != actual {
        return Err(CodeAidError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}

/// Render the report returned to the caller.
pub fn assemble_report(
    service_name: &str,
    spec: Option<&DeploymentSpec>,
    state: &DeploymentState,
    readiness: Option<&ReadinessReport>,
    failed_stage: Option<DeployStage>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Deployment report: {}\n\n", service_name));

    match failed_stage {
        None => out.push_str("Outcome: SUCCESS\n"),
        Some(stage) => out.push_str(&format!("Outcome: FAILED at stage {}\n", stage)),
    }
    if let Some(spec) = spec {
        out.push_str(&format!("Image: {}\n", spec.image_ref));
    }
    if let Some(readiness) = readiness {
        match &readiness.observed {
            Some(workload) => out.push_str(&format!(
                "Workload: {} ({}), healthy: {}\n",
                workload.name,
                workload.phase,
                if readiness.healthy { "yes" } else { "no" }
            )),
            None => {
                out.push_str(&format!(
                    "Workload: not observed after {} poll(s)",
                    readiness.polls
                ));
                if let Some(waiting) = &readiness.last_waiting {
                    out.push_str(&format!(
                        ", last seen {} ({})",
                        waiting.name, waiting.phase
                    ));
                }
                out.push('\n');
            }
        }
    }

    if let Some(spec) = spec {
        out.push_str("\n## Dockerfile\n\n");
        out.push_str(spec.dockerfile.trim_end());
        out.push_str("\n\n## config.yaml\n\n");
        out.push_str(spec.manifest.trim_end());
        out.push('\n');
    }

    out.push_str("\n## Operation log\n\n");
    out.push_str(&state.render());
    out.push('\n');
    out
}

/// Append a narrative section to `report`.
pub fn append_narrative(report: &mut String, narrative: &str) {
    report.push_str("\n## Summary\n\n");
    report.push_str(narrative.trim());
    report.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{WorkloadPhase, WorkloadStatus};

    fn spec() -> DeploymentSpec {
        DeploymentSpec {
            service_name: "codeaidapter-1".into(),
            local_tag: "codeaidapter-1:latest".into(),
            image_ref: "reg/p/r/codeaidapter-1:latest".into(),
            dockerfile: "FROM python:3.12\nCMD [\"python\", \"app.py\"]".into(),
            manifest: "apiVersion: v1\nkind: Pod".into(),
            source_file_name: "app.py".into(),
            source: "print(1)".into(),
        }
    }

    fn record(state: &DeploymentState) -> RunRecord {
        RunRecord {
            service_name: "codeaidapter-1".into(),
            spec: Some(spec()),
            operations: state.entries().to_vec(),
            readiness: Some(ReadinessReport {
                polls: 2,
                observed: Some(WorkloadStatus {
                    name: "codeaidapter-1-abc".into(),
                    phase: WorkloadPhase::Running,
                }),
                healthy: true,
                last_waiting: None,
            }),
            success: true,
            failed_stage: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_sections() {
        let mut state = DeploymentState::new(100);
        state.note(DeployStage::Push, "Docker push successful.", true);
        let readiness = ReadinessReport {
            polls: 10,
            observed: None,
            healthy: false,
            last_waiting: Some(WorkloadStatus {
                name: "codeaidapter-1-abc".into(),
                phase: WorkloadPhase::Pending,
            }),
        };
        let report = assemble_report(
            "codeaidapter-1",
            Some(&spec()),
            &state,
            Some(&readiness),
            Some(DeployStage::AwaitReady),
        );
        assert!(report.contains("Outcome: FAILED at stage await_ready"));
        assert!(report.contains("## Dockerfile\n\nFROM python:3.12"));
        assert!(report.contains("## config.yaml\n\napiVersion: v1"));
        assert!(report.contains(
            "not observed after 10 poll(s), last seen codeaidapter-1-abc (Pending)"
        ));
        assert!(report.contains("Docker push successful."));
    }

    #[test]
    fn test_narrative_is_appended_last() {
        let mut report = assemble_report("svc", None, &DeploymentState::new(10), None, None);
        append_narrative(&mut report, "  All good.  ");
        assert!(report.ends_with("## Summary\n\nAll good.\n"));
    }

    #[test]
    fn test_run_record_roundtrip_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = DeploymentState::new(100);
        state.note(DeployStage::Apply, "applied", true);
        let original = record(&state);

        let path = write_run_record(&original, dir.path()).unwrap();
        assert!(path.ends_with(RUN_RECORD_FILE));
        let loaded = read_run_record(dir.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_tampered_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = DeploymentState::new(100);
        write_run_record(&record(&state), dir.path()).unwrap();

        let path = dir.path().join(RUN_RECORD_FILE);
        let mut json = std::fs::read_to_string(&path).unwrap();
        json = json.replace("codeaidapter-1", "codeaidapter-2");
        std::fs::write(&path, json).unwrap();

        let err = read_run_record(dir.path()).unwrap_err();
        assert!(matches!(err, CodeAidError::DigestMismatch { .. }));
    }

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
