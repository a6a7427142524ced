use modeljoin_model::{ClassDecl, DataType, Metamodel, MetamodelDecl, Model, ModelDoc};
use modeljoin_plan::{
    Export, Expression, FeatureKind, FeaturePlan, FeaturePlanType, FeatureRef, FromClause,
    QueryPlan, SourceDescriptor, SourceLocation, TargetClassPlan,
};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

fn modeljoin_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_modeljoin"))
}

fn write_json(dir: &Path, name: &str, value: &impl serde::Serialize) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

struct Files {
    source_metamodel: PathBuf,
    target_metamodel: PathBuf,
    model: PathBuf,
}

fn write_fixture(dir: &Path) -> Files {
    let source = MetamodelDecl::new("restaurants")
        .with_class(ClassDecl::new("Restaurant").attribute("name", DataType::String));
    let target = MetamodelDecl::new("guide")
        .with_class(ClassDecl::new("Root").containment("allRestaurants", "Restaurant", true))
        .with_class(
            ClassDecl::new("Restaurant")
                .attribute("name", DataType::String)
                .attribute("label", DataType::String),
        );

    let mut model = Model::new(Arc::new(Metamodel::new(source.clone()).unwrap()));
    for name in ["Pasta Place", "Thai Garden"] {
        let r = model.create_by_name("Restaurant").unwrap();
        model.set_by_name(r, "name", name.into()).unwrap();
    }

    Files {
        source_metamodel: write_json(dir, "restaurants.metamodel.json", &source),
        target_metamodel: write_json(dir, "guide.metamodel.json", &target),
        model: write_json(dir, "restaurants.model.json", &model.to_doc()),
    }
}

fn guide_plan(label: Expression) -> QueryPlan {
    QueryPlan {
        export: Export {
            name: "guide".into(),
            uri: "http://example.org/guide".into(),
        },
        classes: vec![
            TargetClassPlan::new("Root"),
            TargetClassPlan::new("Restaurant")
                .with_source(SourceDescriptor::new(
                    FromClause::new("restaurants", "Restaurant").with_alias("r"),
                ))
                .with_feature(FeaturePlan::new(
                    "name",
                    FeatureKind::Copy {
                        source: FeatureRef::new("restaurants", "Restaurant", "name"),
                        expression: None,
                    },
                    FeaturePlanType::Data {
                        datatype: DataType::String,
                    },
                ))
                .with_feature(FeaturePlan::new(
                    "label",
                    FeatureKind::Calculate { expression: label },
                    FeaturePlanType::Data {
                        datatype: DataType::String,
                    },
                )),
        ],
        root: 0,
    }
}

fn run(args: &[&OsStr]) -> Output {
    Command::new(modeljoin_bin())
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("run modeljoin")
}

fn transform_args<'a>(files: &'a Files, plan: &'a Path, out: &'a Path) -> Vec<&'a std::ffi::OsStr> {
    vec![
        OsStr::new("transform"),
        OsStr::new("--plan"),
        plan.as_os_str(),
        OsStr::new("--metamodel"),
        files.source_metamodel.as_os_str(),
        OsStr::new("--model"),
        files.model.as_os_str(),
        OsStr::new("--target-metamodel"),
        files.target_metamodel.as_os_str(),
        OsStr::new("--out"),
        out.as_os_str(),
    ]
}

#[test]
fn test_transform_writes_target_model_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    let plan = write_json(
        dir.path(),
        "guide.plan.json",
        &guide_plan(Expression::new(r#"concat(r.name, "!")"#)),
    );
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let output = run(&transform_args(&files, &plan, &out));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let written = out.join("guide.plan.json");
    let doc: ModelDoc = serde_json::from_str(&fs::read_to_string(written).unwrap()).unwrap();
    assert_eq!(doc.metamodel, "guide");
    let labels: Vec<&str> = doc
        .objects
        .iter()
        .filter(|o| o.class == "Restaurant")
        .filter_map(|o| o.features.get("label").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(labels, vec!["Pasta Place!", "Thai Garden!"]);
    let root = doc.objects.iter().find(|o| o.class == "Root").unwrap();
    assert_eq!(root.features["allRestaurants"].as_array().unwrap().len(), 2);
}

#[test]
fn test_transform_failure_reports_location() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    let location = SourceLocation {
        file: "guide.mj".into(),
        start_line: 7,
        start_column: 12,
        end_line: 7,
        end_column: 20,
        length: 8,
    };
    let plan = write_json(
        dir.path(),
        "guide.plan.json",
        &guide_plan(Expression::new("r.name + owner").at(location)),
    );
    let out = dir.path().join("guide.json");

    let output = run(&transform_args(&files, &plan, &out));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[ERROR]"), "stderr: {stderr}");
    assert!(
        stderr.contains(
            "Failed to transform models: error during expression evaluation: [UnknownVariable] unknown variable 'owner' (guide.mj:7:12)"
        ),
        "stderr: {stderr}"
    );
    assert!(!out.exists());
}

#[test]
fn test_check_accepts_consistent_plan() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    let plan = write_json(
        dir.path(),
        "guide.plan.json",
        &guide_plan(Expression::new("r.name")),
    );
    let output = run(&[
        OsStr::new("check"),
        OsStr::new("--plan"),
        plan.as_os_str(),
        OsStr::new("--metamodel"),
        files.source_metamodel.as_os_str(),
        OsStr::new("--target-metamodel"),
        files.target_metamodel.as_os_str(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_check_reports_unresolved_names_and_bad_expressions() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    let mut plan = guide_plan(Expression::new("r.name +"));
    plan.classes[1].source = Some(SourceDescriptor::new(FromClause::new(
        "restaurants",
        "Bistro",
    )));
    let plan = write_json(dir.path(), "guide.plan.json", &plan);

    let output = run(&[
        OsStr::new("check"),
        OsStr::new("-p"),
        plan.as_os_str(),
        OsStr::new("-m"),
        files.source_metamodel.as_os_str(),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Bistro"), "stderr: {stderr}");
    assert!(stderr.contains("cannot parse expression"), "stderr: {stderr}");
}

#[test]
fn test_missing_input_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    let output = run(&[
        OsStr::new("check"),
        OsStr::new("--plan"),
        missing.as_os_str(),
        OsStr::new("--metamodel"),
        missing.as_os_str(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot read"));
}
