//! Static description of pipeline stages.

use std::path::PathBuf;
use std::time::Duration;

use aspire_annotate::ReconcileOptions;

/// Where a stage reads its files from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    /// A source folder outside the build root.
    Source(PathBuf),
    /// A named output folder of an earlier stage.
    Stage { stage: String, output: String },
}

/// External program invoked by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub program: String,
    /// Argument templates; see [`crate::plan::render_args`].
    pub args: Vec<String>,
    /// One invocation per input file instead of one per folder.
    pub per_file: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: String,
    pub input: StageInput,
    /// Canonical output folder names. The first is the primary output; the
    /// others are branch outputs sharing the stage suffix.
    pub outputs: Vec<String>,
    /// Techniques this stage acts on. Empty means the stage applies no
    /// annotations and does not contribute to cache suffixes.
    pub filter: Vec<String>,
    pub excluded: bool,
    pub traverse: bool,
    pub preprocessed: bool,
    pub keep_placeholders: bool,
    pub replace_all: bool,
    /// File extensions forming per-file work items. Empty selects every file.
    pub extensions: Vec<String>,
    pub tool: Option<ToolSpec>,
}

impl StageDescriptor {
    pub fn primary_output(&self) -> &str {
        self.outputs.first().map_or(self.name.as_str(), String::as_str)
    }

    /// Whether annotations can affect this stage at all.
    pub fn uses_annotations(&self) -> bool {
        !self.excluded && !self.traverse && !self.filter.is_empty()
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            filter: self.filter.clone(),
            keep_placeholders: self.keep_placeholders,
            replace_all: self.replace_all,
            preprocessed: self.preprocessed,
        }
    }
}

const SLP07: &[&str] = &["remote_attestation", "invariant_monitoring"];
const SLP08: &[&str] = &["guarded_region", "guard_attestator", "guard_verifier"];
const BLP04: &[&str] = &[
    "call_stack_check",
    "anti_debugging",
    "softvm",
    "obfuscations",
    "code_mobility",
];

/// Techniques handled by the well-known protection stages.
pub fn default_filter(stage: &str) -> Option<Vec<String>> {
    let techniques: Vec<&str> = match stage {
        "SLP03" => vec!["wbc"],
        "SLP05" => vec!["data_to_proc", "rnc", "xor", "merge_vars"],
        "SLP06" => vec!["barrier_slicing"],
        "SLP07" => SLP07.to_vec(),
        "SLP08" => SLP08.to_vec(),
        "SLP09" => vec!["anti_cloning"],
        "SLP10" => vec!["timebombs"],
        "SLP11" => vec!["dcl"],
        "SLP12" => vec!["cf_tagging"],
        // Binary protections; their annotations are extracted during SLP04.
        "BLP04" | "SLP04" => [BLP04, SLP07, SLP08].concat(),
        _ => return None,
    };
    Some(techniques.into_iter().map(str::to_string).collect())
}
