//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use aspire_annotate::{Annotation, AnnotationSet};
use aspire_pipeline::{BuildContext, BuildOptions, PipelineConfig, ToolError, ToolRunner, WorkItem};

pub const PIPELINE: &str = r#"
[build]
annotations = ["annotations.json"]
jobs = 2

[[stage]]
name = "SLP01"
source = "src"
outputs = ["SC02"]
traverse = true

[[stage]]
name = "SLP05"
input = "SLP01"
outputs = ["SC06"]
filter = ["xor"]
extensions = ["c"]
[stage.tool]
program = "obfuscate"
args = ["{input}", "{output}"]
per_file = true

[[stage]]
name = "SLP06"
input = "SLP05"
outputs = ["SC07", "SCS01"]
filter = ["barrier_slicing"]
[stage.tool]
program = "split"
args = ["{input}", "{output}", "{output:SCS01}"]

[[stage]]
name = "SERVER"
input = "SLP06:SCS01"
outputs = ["S01"]
traverse = true
"#;

pub fn xor(mask: u32) -> String {
    format!("protection(xor, mask(constant({mask})))")
}

pub fn attribute(content: &str) -> String {
    format!("__attribute__((ASPIRE(\"{content}\")))")
}

pub fn main_source() -> String {
    format!(
        "int a;\nint key {};\nint main(void) {{ return key; }}\n",
        attribute("protection(placeHolder, id(1))")
    )
}

pub fn annotations(mask: u32) -> AnnotationSet {
    AnnotationSet::new(vec![Annotation::new(1, "src/main.c", xor(mask))])
}

/// Project folder with a `src/main.c` and the pipeline config.
pub fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.c"), main_source()).unwrap();
    dir
}

pub fn config(base: &Path, text: &str) -> PipelineConfig {
    PipelineConfig::parse(text, base).unwrap()
}

pub fn context(base: &Path, text: &str, set: AnnotationSet, options: BuildOptions) -> BuildContext {
    BuildContext::with_annotations(config(base, text), set, options)
}

/// Copies visible inputs to every expected output and records invocations.
#[derive(Default)]
pub struct CopyRunner {
    pub calls: Mutex<Vec<String>>,
    /// Stage whose invocations fail.
    pub fail_stage: Option<String>,
}

impl CopyRunner {
    pub fn failing(stage: &str) -> Self {
        Self {
            calls: Mutex::default(),
            fail_stage: Some(stage.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl ToolRunner for CopyRunner {
    fn run(&self, item: &WorkItem, _timeout: Duration) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(item.stage.clone());
        if self.fail_stage.as_deref() == Some(item.stage.as_str()) {
            return Err(ToolError::Failed {
                program: item.program.clone(),
                code: Some(1),
                stderr: "boom".to_string(),
            });
        }
        for output in &item.expected_outputs {
            if item.input.is_file() {
                fs::copy(&item.input, output).unwrap();
            } else {
                for file in visible_files(&item.input) {
                    fs::copy(&file, output.join(file.file_name().unwrap())).unwrap();
                }
            }
        }
        Ok(())
    }
}

pub fn visible_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_file())
        .filter(|path| !path.file_name().unwrap().to_string_lossy().starts_with('.'))
        .collect();
    files.sort();
    files
}
