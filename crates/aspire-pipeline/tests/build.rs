//! End-to-end builds with a runner that copies its inputs.

#![cfg(unix)]

mod common;

use std::fs;
use std::time::SystemTime;

use aspire_annotate::{APPLIED_STATE_FILE, AnnotationError};
use aspire_pipeline::{
    BuildOptions, COMPLETION_STAMP, Disposition, PipelineError, RECONCILED_STAMP, StageFailure,
    execute,
};

use common::{CopyRunner, PIPELINE, annotations, attribute, context, main_source, project, xor};

#[test]
fn test_build_applies_annotations_and_publishes_aliases() {
    let dir = project();
    let root = dir.path().join("build");
    let ctx = context(dir.path(), PIPELINE, annotations(35), BuildOptions::default());
    let runner = CopyRunner::default();

    let report = execute(&ctx, &runner).unwrap();

    assert_eq!(report.count(Disposition::Execute), 2);
    assert_eq!(report.count(Disposition::Traverse), 2);
    assert_eq!(runner.calls(), vec!["SLP05".to_string(), "SLP06".to_string()]);

    let slp05 = &report.stages[1];
    let reconciled = slp05.reconcile.unwrap();
    assert_eq!(reconciled.new, 1);
    assert_eq!(reconciled.rewritten_files, 1);
    assert!(slp05.working_dir.join(APPLIED_STATE_FILE).is_file());
    assert!(slp05.output_dir.join(COMPLETION_STAMP).is_file());

    let obfuscated = fs::read_to_string(root.join("SC06/main.c")).unwrap();
    assert!(obfuscated.contains(&attribute(&xor(35))));
    assert_eq!(
        fs::read_link(root.join("SC06")).unwrap().to_string_lossy(),
        format!("SC06{}", slp05.suffix)
    );
    assert!(root.join("S01/main.c").is_file());

    // Sources and the traversed copy keep their placeholders.
    assert_eq!(fs::read_to_string(dir.path().join("src/main.c")).unwrap(), main_source());
    assert_eq!(fs::read_to_string(root.join("SC02/main.c")).unwrap(), main_source());
}

#[test]
fn test_second_build_reuses_outputs() {
    let dir = project();
    let ctx = context(dir.path(), PIPELINE, annotations(35), BuildOptions::default());
    execute(&ctx, &CopyRunner::default()).unwrap();

    let runner = CopyRunner::default();
    let report = execute(&ctx, &runner).unwrap();

    assert!(runner.calls().is_empty());
    assert_eq!(report.stages[1].disposition, Disposition::Reuse);
    assert_eq!(report.stages[2].disposition, Disposition::Reuse);
    assert!(report.stages[1].reconcile.is_none());
}

#[test]
fn test_annotation_change_builds_new_folders() {
    let dir = project();
    let root = dir.path().join("build");
    let first = execute(
        &context(dir.path(), PIPELINE, annotations(35), BuildOptions::default()),
        &CopyRunner::default(),
    )
    .unwrap();

    let runner = CopyRunner::default();
    let second = execute(
        &context(dir.path(), PIPELINE, annotations(99), BuildOptions::default()),
        &runner,
    )
    .unwrap();

    assert_eq!(second.stages[1].disposition, Disposition::Execute);
    assert_eq!(runner.calls().len(), 2);
    assert_ne!(first.stages[1].output_dir, second.stages[1].output_dir);
    assert!(first.stages[1].output_dir.is_dir());

    let current = fs::read_to_string(root.join("SC06/main.c")).unwrap();
    assert!(current.contains(&attribute(&xor(99))));
    let previous = fs::read_to_string(first.stages[1].output_dir.join("main.c")).unwrap();
    assert!(previous.contains(&attribute(&xor(35))));
}

#[test]
fn test_rerun_after_failed_reconcile_starts_from_fresh_copy() {
    let dir = project();
    let root = dir.path().join("build");
    let ctx = context(dir.path(), PIPELINE, annotations(35), BuildOptions::default());
    fs::write(dir.path().join("src/main.c"), "int main(void) { return 0; }\n").unwrap();

    let err = execute(&ctx, &CopyRunner::default()).unwrap_err();

    assert_eq!(err.stage_name(), Some("SLP05"));
    assert!(matches!(
        err,
        PipelineError::Stage {
            source: StageFailure::Annotations(AnnotationError::Reconciliation { .. }),
            ..
        }
    ));
    let working = fs::read_dir(&root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| path.file_name().unwrap().to_string_lossy().starts_with("SC02.SLP05"))
        .unwrap();
    assert!(!working.join(RECONCILED_STAMP).exists());

    fs::write(dir.path().join("src/main.c"), main_source()).unwrap();
    let runner = CopyRunner::default();
    let report = execute(&ctx, &runner).unwrap();

    assert_eq!(report.stages[1].disposition, Disposition::Execute);
    assert_eq!(report.stages[1].reconcile.unwrap().new, 1);
    assert!(report.stages[1].working_dir.join(RECONCILED_STAMP).is_file());
    let obfuscated = fs::read_to_string(root.join("SC06/main.c")).unwrap();
    assert!(obfuscated.contains(&attribute(&xor(35))));
}

#[test]
fn test_reexecuted_stage_sees_rebuilt_upstream() {
    let dir = project();
    let root = dir.path().join("build");
    execute(
        &context(dir.path(), PIPELINE, annotations(35), BuildOptions::default()),
        &CopyRunner::default(),
    )
    .unwrap();

    let changed = format!("{}int added;\n", main_source());
    fs::write(dir.path().join("src/main.c"), &changed).unwrap();
    // A config edit invalidates every stamp without touching annotations.
    let mut ctx = context(dir.path(), PIPELINE, annotations(35), BuildOptions::default());
    ctx.config_modified = Some(SystemTime::now());
    let runner = CopyRunner::default();
    let report = execute(&ctx, &runner).unwrap();

    assert_eq!(report.stages[0].disposition, Disposition::Traverse);
    assert_eq!(report.stages[1].disposition, Disposition::Execute);
    assert_eq!(runner.calls(), vec!["SLP05".to_string(), "SLP06".to_string()]);
    let obfuscated = fs::read_to_string(root.join("SC06/main.c")).unwrap();
    assert!(obfuscated.contains("int added;"));
    assert!(obfuscated.contains(&attribute(&xor(35))));
    assert!(fs::read_to_string(root.join("S01/main.c")).unwrap().contains("int added;"));
}

#[test]
fn test_caching_off_rebuilds_in_place() {
    let dir = project();
    let root = dir.path().join("build");
    let text = PIPELINE.replace("jobs = 2", "jobs = 2\ncaching = false");
    execute(
        &context(dir.path(), &text, annotations(35), BuildOptions::default()),
        &CopyRunner::default(),
    )
    .unwrap();

    let runner = CopyRunner::default();
    let report = execute(
        &context(dir.path(), &text, annotations(99), BuildOptions::default()),
        &runner,
    )
    .unwrap();

    assert_eq!(report.stages[1].disposition, Disposition::Execute);
    assert_eq!(runner.calls().len(), 2);
    assert!(!fs::symlink_metadata(root.join("SC06")).unwrap().file_type().is_symlink());
    let current = fs::read_to_string(root.join("SC06/main.c")).unwrap();
    assert!(current.contains(&attribute(&xor(99))));
}

#[test]
fn test_tool_failure_names_stage() {
    let dir = project();
    let ctx = context(dir.path(), PIPELINE, annotations(35), BuildOptions::default());
    let runner = CopyRunner::failing("SLP06");

    let err = execute(&ctx, &runner).unwrap_err();

    assert_eq!(err.stage_name(), Some("SLP06"));
    assert!(matches!(
        err,
        PipelineError::Stage {
            source: StageFailure::Tool { .. },
            ..
        }
    ));
    let root = dir.path().join("build");
    assert!(root.join("SC06").join(COMPLETION_STAMP).is_file());
    let slp06_output = fs::read_dir(&root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| path.file_name().unwrap().to_string_lossy().starts_with("SC07"))
        .unwrap();
    assert!(!slp06_output.join(COMPLETION_STAMP).exists());
}

#[test]
fn test_missing_source_folder_fails_first_stage() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), PIPELINE, annotations(35), BuildOptions::default());

    let err = execute(&ctx, &CopyRunner::default()).unwrap_err();

    assert_eq!(err.stage_name(), Some("SLP01"));
    assert!(matches!(
        err,
        PipelineError::Stage {
            source: StageFailure::Io { .. },
            ..
        }
    ));
}
