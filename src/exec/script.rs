// src/exec/script.rs

//! Generation of self-contained stage scripts.
//!
//! Every external command is rendered as `<install_root>/bin/<tool> args...`.
//! The tool prefix is resolved once at startup and handed in as a value.
//! Argument templates use `{placeholder}` syntax; each template kind accepts
//! a fixed set of placeholders, checked both at config validation time and
//! at render time.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::config::model::{CommandConfig, Params};
use crate::plan::ResourceRequest;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([^{}]*)\}").expect("placeholder regex is valid")
});

/// Shell variable holding the checkpoint's unit count inside batch scripts.
pub const UNITS_TOTAL_VAR: &str = "N";

/// Shell variable accumulating the produced per-unit parts inside batch scripts.
pub const PARTS_VAR: &str = "PARTS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder `{{{0}}}`")]
    Unknown(String),

    #[error("placeholder `{{{placeholder}}}` is not available in {kind} commands")]
    NotAllowed {
        placeholder: String,
        kind: &'static str,
    },

    #[error("unknown parameter `{0}` (not present in [params])")]
    UnknownParam(String),

    #[error("placeholder `{{{placeholder}}}` is out of range ({available} available)")]
    OutOfRange {
        placeholder: String,
        available: usize,
    },

    #[error("`{{parts}}` must be a whole argument on its own")]
    PartsNotAlone,

    #[error("unbalanced braces in argument `{0}`")]
    Unbalanced(String),

    #[error("empty tool name")]
    EmptyTool,
}

/// Which kind of command a template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// A static stage.
    Stage,
    /// A checkpoint's probing command.
    Probe,
    /// A per-unit counting command inside a batch.
    Count,
    /// The per-batch merge of unit parts.
    Merge,
}

impl TemplateKind {
    fn name(&self) -> &'static str {
        match self {
            TemplateKind::Stage => "stage",
            TemplateKind::Probe => "probe",
            TemplateKind::Count => "count",
            TemplateKind::Merge => "merge",
        }
    }

    fn allows(&self, p: &Placeholder) -> bool {
        use Placeholder::*;
        match p {
            Param(_) | Cpus | MemoryGb | WallTimeH | StageDir => true,
            Input(_) => matches!(
                self,
                TemplateKind::Stage | TemplateKind::Probe | TemplateKind::Count
            ),
            Output(_) => !matches!(self, TemplateKind::Probe),
            Unit | UnitsTotal => matches!(self, TemplateKind::Count),
            Scratch => matches!(self, TemplateKind::Probe),
            Parts => matches!(self, TemplateKind::Merge),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Param(String),
    Input(usize),
    Output(usize),
    Unit,
    UnitsTotal,
    Parts,
    Scratch,
    Cpus,
    MemoryGb,
    WallTimeH,
    StageDir,
}

fn parse_placeholder(raw: &str) -> Result<Placeholder, TemplateError> {
    if let Some(key) = raw.strip_prefix("params.") {
        if key.is_empty() {
            return Err(TemplateError::Unknown(raw.to_string()));
        }
        return Ok(Placeholder::Param(key.to_string()));
    }

    let (name, index) = match raw.split_once(':') {
        Some((name, idx)) => {
            let idx = idx
                .parse::<usize>()
                .map_err(|_| TemplateError::Unknown(raw.to_string()))?;
            (name, Some(idx))
        }
        None => (raw, None),
    };

    let p = match (name, index) {
        ("input", i) => Placeholder::Input(i.unwrap_or(0)),
        ("output", i) => Placeholder::Output(i.unwrap_or(0)),
        ("unit", None) => Placeholder::Unit,
        ("units_total", None) => Placeholder::UnitsTotal,
        ("parts", None) => Placeholder::Parts,
        ("scratch", None) => Placeholder::Scratch,
        ("cpus", None) => Placeholder::Cpus,
        ("memory_gb", None) => Placeholder::MemoryGb,
        ("wall_time_h", None) => Placeholder::WallTimeH,
        ("stage_dir", None) => Placeholder::StageDir,
        _ => return Err(TemplateError::Unknown(raw.to_string())),
    };
    Ok(p)
}

/// Values available while rendering one command.
#[derive(Debug, Clone)]
pub struct Bindings<'a> {
    pub params: &'a Params,
    pub inputs: &'a [PathBuf],
    pub outputs: &'a [PathBuf],
    pub unit: Option<u64>,
    pub scratch: Option<&'a Path>,
    pub request: ResourceRequest,
    pub stage_dir: &'a Path,
}

impl<'a> Bindings<'a> {
    pub fn new(params: &'a Params, stage_dir: &'a Path, request: ResourceRequest) -> Self {
        Self {
            params,
            inputs: &[],
            outputs: &[],
            unit: None,
            scratch: None,
            request,
            stage_dir,
        }
    }

    pub fn inputs(mut self, inputs: &'a [PathBuf]) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: &'a [PathBuf]) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn unit(mut self, unit: u64) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn scratch(mut self, scratch: &'a Path) -> Self {
        self.scratch = Some(scratch);
        self
    }
}

/// Fixed path prefix for external binaries, derived from the install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPrefix {
    bin_dir: PathBuf,
}

impl ToolPrefix {
    pub fn from_install_root(root: impl AsRef<Path>) -> Self {
        Self {
            bin_dir: root.as_ref().join("bin"),
        }
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn tool_path(&self, tool: &str) -> PathBuf {
        self.bin_dir.join(tool)
    }
}

/// Check a command template without rendering it.
///
/// `inputs` / `outputs` are the counts available for indexed placeholders
/// (`None` means "unbounded", used where the count is only known at run time).
pub fn check_template(
    kind: TemplateKind,
    cmd: &CommandConfig,
    params: &Params,
    inputs: Option<usize>,
    outputs: Option<usize>,
) -> Result<(), TemplateError> {
    if cmd.tool.trim().is_empty() {
        return Err(TemplateError::EmptyTool);
    }

    for arg in &cmd.args {
        for raw in placeholders_in(arg)? {
            let p = parse_placeholder(&raw)?;
            if !kind.allows(&p) {
                return Err(TemplateError::NotAllowed {
                    placeholder: raw,
                    kind: kind.name(),
                });
            }
            match &p {
                Placeholder::Param(key) if !params.contains_key(key) => {
                    return Err(TemplateError::UnknownParam(key.clone()));
                }
                Placeholder::Input(i) => check_index(&raw, *i, inputs)?,
                Placeholder::Output(i) => check_index(&raw, *i, outputs)?,
                Placeholder::Parts if arg != "{parts}" => {
                    return Err(TemplateError::PartsNotAlone);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn check_index(raw: &str, index: usize, available: Option<usize>) -> Result<(), TemplateError> {
    match available {
        Some(n) if index >= n => Err(TemplateError::OutOfRange {
            placeholder: raw.to_string(),
            available: n,
        }),
        _ => Ok(()),
    }
}

fn placeholders_in(arg: &str) -> Result<Vec<String>, TemplateError> {
    let stripped = PLACEHOLDER_RE.replace_all(arg, "");
    if stripped.contains('{') || stripped.contains('}') {
        return Err(TemplateError::Unbalanced(arg.to_string()));
    }
    Ok(PLACEHOLDER_RE
        .captures_iter(arg)
        .map(|c| c[1].to_string())
        .collect())
}

/// Render a full command line: quoted tool path followed by rendered args.
pub fn render_command(
    tools: &ToolPrefix,
    kind: TemplateKind,
    cmd: &CommandConfig,
    b: &Bindings<'_>,
) -> Result<String, TemplateError> {
    check_template(
        kind,
        cmd,
        b.params,
        Some(b.inputs.len()),
        Some(b.outputs.len()),
    )?;

    let mut words = vec![quote(&tools.tool_path(&cmd.tool).to_string_lossy())];
    for arg in &cmd.args {
        words.push(render_arg(kind, arg, b)?);
    }
    Ok(words.join(" "))
}

/// Render one argument as a single shell word.
///
/// Literal text is single-quoted; `{units_total}` becomes a double-quoted
/// shell expansion; `{parts}` (always a whole argument) expands unquoted so
/// that the shell splits the list of produced parts.
fn render_arg(kind: TemplateKind, arg: &str, b: &Bindings<'_>) -> Result<String, TemplateError> {
    if arg == "{parts}" {
        return Ok(format!("${PARTS_VAR}"));
    }

    let mut out = String::new();
    let mut literal = String::new();
    let mut last = 0;

    for caps in PLACEHOLDER_RE.captures_iter(arg) {
        let whole = caps.get(0).expect("group 0 always present");
        literal.push_str(&arg[last..whole.start()]);
        last = whole.end();

        let raw = &caps[1];
        match parse_placeholder(raw)? {
            Placeholder::UnitsTotal => {
                flush_literal(&mut out, &mut literal);
                out.push_str(&format!("\"${UNITS_TOTAL_VAR}\""));
            }
            p => literal.push_str(&value_of(kind, raw, &p, b)?),
        }
    }
    literal.push_str(&arg[last..]);
    flush_literal(&mut out, &mut literal);

    if out.is_empty() {
        out.push_str("''");
    }
    Ok(out)
}

fn flush_literal(out: &mut String, literal: &mut String) {
    if !literal.is_empty() {
        out.push_str(&quote(literal));
        literal.clear();
    }
}

fn value_of(
    kind: TemplateKind,
    raw: &str,
    p: &Placeholder,
    b: &Bindings<'_>,
) -> Result<String, TemplateError> {
    let not_bound = || TemplateError::NotAllowed {
        placeholder: raw.to_string(),
        kind: kind.name(),
    };
    let path_at = |paths: &[PathBuf], i: usize| {
        paths
            .get(i)
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| TemplateError::OutOfRange {
                placeholder: raw.to_string(),
                available: paths.len(),
            })
    };

    let value = match p {
        Placeholder::Param(key) => b
            .params
            .get(key)
            .map(|v| v.to_string())
            .ok_or_else(|| TemplateError::UnknownParam(key.clone()))?,
        Placeholder::Input(i) => path_at(b.inputs, *i)?,
        Placeholder::Output(i) => path_at(b.outputs, *i)?,
        Placeholder::Unit => b.unit.ok_or_else(not_bound)?.to_string(),
        Placeholder::Scratch => b
            .scratch
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(not_bound)?,
        Placeholder::Cpus => b.request.cpus.to_string(),
        Placeholder::MemoryGb => b.request.memory_gb.to_string(),
        Placeholder::WallTimeH => b.request.wall_time_h.to_string(),
        Placeholder::StageDir => b.stage_dir.to_string_lossy().into_owned(),
        Placeholder::UnitsTotal | Placeholder::Parts => return Err(TemplateError::PartsNotAlone),
    };
    Ok(value)
}

/// Single-quote a string for POSIX `sh`.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// A generated stage script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    text: String,
}

impl Script {
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Line-oriented builder for stage scripts.
///
/// Scripts always start with `set -eu` and `cd` into the stage directory, so
/// any failing command fails the whole stage.
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    lines: Vec<String>,
    indent: usize,
}

impl ScriptBuilder {
    pub fn new(stage: &str, stage_dir: &Path) -> Self {
        let lines = vec![
            "#!/bin/sh".to_string(),
            format!("# countdag stage: {stage}"),
            "set -eu".to_string(),
            format!("cd {}", quote(&stage_dir.to_string_lossy())),
        ];
        Self { lines, indent: 0 }
    }

    pub fn line(mut self, line: impl AsRef<str>) -> Self {
        let pad = "  ".repeat(self.indent);
        self.lines.push(format!("{pad}{}", line.as_ref()));
        self
    }

    /// Open an `if [ <unit> -le "$N" ]; then` range guard.
    pub fn guard_unit(self, unit: u64) -> Self {
        let mut b = self.line(format!("if [ {unit} -le \"${UNITS_TOTAL_VAR}\" ]; then"));
        b.indent += 1;
        b
    }

    pub fn end_guard(mut self) -> Self {
        self.indent = self.indent.saturating_sub(1);
        self.line("fi")
    }

    pub fn build(self) -> Script {
        let mut text = self.lines.join("\n");
        text.push('\n');
        Script { text }
    }
}
