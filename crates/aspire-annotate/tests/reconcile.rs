//! Integration tests for incremental directive rewriting on real files.

use std::fs;
use std::path::Path;

use aspire_annotate::hash::line_hash;
use aspire_annotate::{
    APPLIED_STATE_FILE, AnchorError, Annotation, AnnotationError, AnnotationSet,
    ReconcileOptions, reconcile,
};

const XOR: &str = "protection(xor, mask(constant(35)))";

fn attribute(content: &str) -> String {
    format!("__attribute__((ASPIRE(\"{content}\")))")
}

fn placeholder_marker(id: u64) -> String {
    attribute(&format!("protection(placeHolder, id({id}))"))
}

fn xor_options() -> ReconcileOptions {
    ReconcileOptions {
        filter: vec!["xor".to_string()],
        ..ReconcileOptions::default()
    }
}

fn write_source(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), text).unwrap();
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

fn applied_state(dir: &Path) -> Vec<Annotation> {
    AnnotationSet::load(&dir.join(APPLIED_STATE_FILE))
        .unwrap()
        .into_vec()
}

#[test]
fn end_to_end_placeholder_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "main.c",
        &format!("int a;\nint key {};\n", placeholder_marker(7)),
    );
    let set = AnnotationSet::new(vec![Annotation::new(7, "src/main.c", XOR)]);

    let report = reconcile(dir.path(), &set, &xor_options()).unwrap();

    assert_eq!(report.new, 1);
    assert_eq!(report.rewritten_files, 1);
    let text = read(dir.path(), "main.c");
    let expected_line = format!("int key {};", attribute(XOR));
    assert_eq!(text, format!("int a;\n{expected_line}\n"));

    let state = applied_state(dir.path());
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].line_number, Some(2));
    assert_eq!(state[0].line_hash.as_deref(), Some(line_hash(&expected_line).as_str()));
    assert_eq!(state[0].applied_content.as_deref(), Some(XOR));
}

#[test]
fn second_run_without_changes_rewrites_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_source(dir.path(), "main.c", &format!("{}\n", placeholder_marker(1)));
    let set = AnnotationSet::new(vec![Annotation::new(1, "main.c", XOR)]);

    reconcile(dir.path(), &set, &xor_options()).unwrap();
    let first = read(dir.path(), "main.c");
    let report = reconcile(dir.path(), &set, &xor_options()).unwrap();

    assert_eq!(report.rewrites(), 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.rewritten_files, 0);
    assert_eq!(read(dir.path(), "main.c"), first);
}

#[test]
fn changed_filter_rewrites_at_anchor() {
    let dir = tempfile::tempdir().unwrap();
    // The same directive appears twice; only the anchored copy must change.
    write_source(
        dir.path(),
        "main.c",
        &format!("{}\n{}\n", placeholder_marker(1), attribute(XOR)),
    );
    let set = AnnotationSet::new(vec![Annotation::new(1, "main.c", XOR)]);
    reconcile(dir.path(), &set, &xor_options()).unwrap();

    let updated = "protection(xor, mask(constant(99)))";
    let set = AnnotationSet::new(vec![Annotation::new(1, "main.c", updated)]);
    let report = reconcile(dir.path(), &set, &xor_options()).unwrap();

    assert_eq!(report.changed, 1);
    assert_eq!(
        read(dir.path(), "main.c"),
        format!("{}\n{}\n", attribute(updated), attribute(XOR))
    );
    let state = applied_state(dir.path());
    assert_eq!(state[0].applied_content.as_deref(), Some(updated));
    assert_eq!(state[0].line_number, Some(1));
}

#[test]
fn removed_annotation_reverts_to_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    write_source(dir.path(), "main.c", &format!("{}\n", placeholder_marker(3)));
    let set = AnnotationSet::new(vec![Annotation::new(3, "main.c", XOR)]);
    reconcile(dir.path(), &set, &xor_options()).unwrap();

    let report = reconcile(dir.path(), &AnnotationSet::default(), &xor_options()).unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(read(dir.path(), "main.c"), format!("{}\n", placeholder_marker(3)));
    assert!(applied_state(dir.path()).is_empty());

    // Re-adding anchors on the placeholder again.
    let report = reconcile(dir.path(), &set, &xor_options()).unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(read(dir.path(), "main.c"), format!("{}\n", attribute(XOR)));
}

#[test]
fn edited_anchor_line_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    write_source(dir.path(), "main.c", &format!("{}\n", placeholder_marker(1)));
    let set = AnnotationSet::new(vec![Annotation::new(1, "main.c", XOR)]);
    reconcile(dir.path(), &set, &xor_options()).unwrap();
    let state_before = read(dir.path(), APPLIED_STATE_FILE);

    let edited = format!("static {}\n", attribute(XOR));
    write_source(dir.path(), "main.c", &edited);
    let set = AnnotationSet::new(vec![Annotation::new(1, "main.c", "protection(xor, other)")]);
    let err = reconcile(dir.path(), &set, &xor_options()).unwrap_err();

    match err {
        AnnotationError::Reconciliation { id, source, .. } => {
            assert_eq!(id, 1);
            assert!(matches!(source, AnchorError::Lost { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(read(dir.path(), "main.c"), edited);
    assert_eq!(read(dir.path(), APPLIED_STATE_FILE), state_before);
}

#[test]
fn failure_in_one_file_leaves_every_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let good = format!("{}\n", placeholder_marker(1));
    write_source(dir.path(), "a.c", &good);
    write_source(dir.path(), "b.c", "int nothing_here;\n");
    let set = AnnotationSet::new(vec![
        Annotation::new(1, "a.c", XOR),
        Annotation::new(2, "b.c", XOR),
    ]);

    let err = reconcile(dir.path(), &set, &xor_options()).unwrap_err();

    assert!(err.is_reconciliation());
    assert_eq!(read(dir.path(), "a.c"), good);
    assert!(!dir.path().join(APPLIED_STATE_FILE).exists());
}

#[test]
fn duplicated_placeholder_is_ambiguous() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "main.c",
        &format!("{}\n{}\n", placeholder_marker(5), placeholder_marker(5)),
    );
    let set = AnnotationSet::new(vec![Annotation::new(5, "main.c", XOR)]);

    let err = reconcile(dir.path(), &set, &xor_options()).unwrap_err();

    assert!(matches!(
        err,
        AnnotationError::Reconciliation {
            source: AnchorError::Ambiguous { matches: 2, .. },
            ..
        }
    ));
}

#[test]
fn techniques_outside_the_filter_are_not_applied() {
    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}\n", placeholder_marker(1));
    write_source(dir.path(), "main.c", &source);
    let set = AnnotationSet::new(vec![Annotation::new(1, "main.c", "protection(wbc, key(1))")]);

    let report = reconcile(dir.path(), &set, &xor_options()).unwrap();

    assert_eq!(report.rewrites(), 0);
    assert_eq!(read(dir.path(), "main.c"), source);
    assert!(applied_state(dir.path()).is_empty());
}

#[test]
fn keep_placeholders_appends_marker_and_preprocessed_uses_pragma_lines() {
    let dir = tempfile::tempdir().unwrap();
    write_source(
        dir.path(),
        "main.c.i",
        "#pragma ASPIRE begin protection(placeHolder, id(2))\n",
    );
    let set = AnnotationSet::new(vec![Annotation::new(2, "/src/main.c", XOR)]);
    let options = ReconcileOptions {
        keep_placeholders: true,
        preprocessed: true,
        ..xor_options()
    };

    reconcile(dir.path(), &set, &options).unwrap();

    assert_eq!(
        read(dir.path(), "main.c.i"),
        format!("#pragma ASPIRE begin {XOR}, protection(placeHolder, id(2))\n")
    );
}

#[test]
fn missing_working_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let set = AnnotationSet::new(vec![Annotation::new(1, "gone.c", XOR)]);

    let err = reconcile(dir.path(), &set, &xor_options()).unwrap_err();

    assert!(matches!(err, AnnotationError::NotFound { .. }));
}

#[test]
fn malformed_applied_state_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_source(dir.path(), APPLIED_STATE_FILE, "{not json");

    let err = reconcile(dir.path(), &AnnotationSet::default(), &xor_options()).unwrap_err();

    assert!(matches!(err, AnnotationError::Malformed { .. }));
}
