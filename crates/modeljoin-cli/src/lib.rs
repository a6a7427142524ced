//! Command implementations behind the `modeljoin` binary.
//!
//! Everything here works on paths and returns `anyhow` results so the binary
//! only has to parse arguments and print.

use anyhow::{anyhow, bail, Context, Result};
use modeljoin_expr::{check_plan, ExprEvaluator, ExpressionIssue};
use modeljoin_model::{Metamodel, Model, ModelDoc, ModelSet};
use modeljoin_plan::QueryPlan;
use modeljoin_transform::{TransformError, TransformOptions, Transformator};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Loading
// ============================================================================

pub fn load_metamodel(path: &Path) -> Result<Arc<Metamodel>> {
    let text = read(path)?;
    let metamodel: Metamodel = serde_json::from_str(&text)
        .with_context(|| format!("invalid metamodel {}", path.display()))?;
    debug!(metamodel = metamodel.name(), path = %path.display(), "loaded metamodel");
    Ok(Arc::new(metamodel))
}

pub fn load_plan(path: &Path) -> Result<QueryPlan> {
    let text = read(path)?;
    QueryPlan::from_json(&text).with_context(|| format!("invalid plan {}", path.display()))
}

/// Load a model, resolving its `metamodel` field among `metamodels`.
pub fn load_model(path: &Path, metamodels: &[Arc<Metamodel>]) -> Result<Model> {
    let text = read(path)?;
    let doc: ModelDoc = serde_json::from_str(&text)
        .with_context(|| format!("invalid model {}", path.display()))?;
    let Some(metamodel) = metamodels.iter().find(|m| m.name() == doc.metamodel) else {
        bail!(
            "model {} conforms to metamodel '{}', which was not given",
            path.display(),
            doc.metamodel
        );
    };
    let model = Model::from_doc(Arc::clone(metamodel), &doc)
        .with_context(|| format!("invalid model {}", path.display()))?;
    debug!(objects = model.len(), path = %path.display(), "loaded model");
    Ok(model)
}

pub fn load_options(path: Option<&Path>) -> Result<TransformOptions> {
    let Some(path) = path else {
        return Ok(TransformOptions::default());
    };
    let text = read(path)?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

// ============================================================================
// check
// ============================================================================

#[derive(Debug, Default)]
pub struct CheckReport {
    pub plan_issues: Vec<String>,
    pub expression_issues: Vec<ExpressionIssue>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.plan_issues.is_empty() && self.expression_issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plan_issues.len() + self.expression_issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve the plan against the metamodels and parse its expressions.
pub fn check(plan: &Path, metamodels: &[PathBuf], target: Option<&Path>) -> Result<CheckReport> {
    let plan = load_plan(plan)?;
    let sources = metamodels
        .iter()
        .map(|path| load_metamodel(path))
        .collect::<Result<Vec<_>>>()?;
    let target = target.map(load_metamodel).transpose()?;

    let source_refs: Vec<&Metamodel> = sources.iter().map(Arc::as_ref).collect();
    let report = CheckReport {
        plan_issues: plan
            .validate_against(&source_refs, target.as_deref())
            .iter()
            .map(ToString::to_string)
            .collect(),
        expression_issues: check_plan(&plan),
    };
    for issue in &report.plan_issues {
        warn!("{issue}");
    }
    Ok(report)
}

// ============================================================================
// transform
// ============================================================================

#[derive(Debug, Clone)]
pub struct TransformArgs {
    pub plan: PathBuf,
    pub metamodels: Vec<PathBuf>,
    pub models: Vec<PathBuf>,
    pub target_metamodel: PathBuf,
    pub out: PathBuf,
    pub config: Option<PathBuf>,
}

/// Run a transformation and write the target model. Returns the written path.
pub fn transform(args: &TransformArgs) -> Result<PathBuf> {
    let plan = load_plan(&args.plan)?;
    let metamodels = args
        .metamodels
        .iter()
        .map(|path| load_metamodel(path))
        .collect::<Result<Vec<_>>>()?;
    let target = load_metamodel(&args.target_metamodel)?;
    let options = load_options(args.config.as_deref())?;

    let mut sources = ModelSet::new();
    for path in &args.models {
        let model = load_model(path, &metamodels)?;
        sources
            .insert(model)
            .with_context(|| format!("cannot register {}", path.display()))?;
    }

    let evaluator = ExprEvaluator::new(&sources);
    let result = Transformator::new(&plan, target, &sources, &evaluator)
        .with_options(options)
        .transform()?;

    let out = output_path(&args.out, &args.plan)?;
    let json = serde_json::to_string_pretty(&result.model.to_doc())?;
    fs::write(&out, json).with_context(|| format!("cannot write {}", out.display()))?;
    info!(objects = result.model.len(), out = %out.display(), "wrote target model");
    Ok(out)
}

/// `out` itself, or `<out>/<plan stem>.json` when `out` is a directory.
pub fn output_path(out: &Path, plan: &Path) -> Result<PathBuf> {
    if !out.is_dir() {
        return Ok(out.to_path_buf());
    }
    let stem = plan
        .file_stem()
        .ok_or_else(|| anyhow!("plan path {} has no file name", plan.display()))?;
    let mut name = stem.to_os_string();
    name.push(".json");
    Ok(out.join(name))
}

// ============================================================================
// Reporting
// ============================================================================

/// `<message> (<location>)` for transformation failures that carry a
/// location, the full context chain otherwise.
pub fn describe_error(err: &anyhow::Error) -> String {
    if let Some(err) = err.downcast_ref::<TransformError>() {
        return match &err.location {
            Some(location) => format!("{err} ({location})"),
            None => err.to_string(),
        };
    }
    format!("{err:#}")
}

pub fn describe_issue(issue: &ExpressionIssue) -> String {
    match &issue.location {
        Some(location) => format!("{}: '{}' ({location})", issue.message, issue.text),
        None => format!("{}: '{}'", issue.message, issue.text),
    }
}
