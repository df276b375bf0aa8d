use relightcore::Workflow;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// Which weight files the workflow needs and which are on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightReport {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

/// Look for every weight the workflow references below `models_dir`.
///
/// Weights are matched by file name (or trailing relative path, for inputs
/// like `SD1.5/model.safetensors`) anywhere under the models tree.
pub fn check_weights(workflow: &Workflow, models_dir: &Path) -> WeightReport {
    let on_disk: HashSet<String> = WalkDir::new(models_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(models_dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    let mut report = WeightReport::default();
    for weight in workflow.referenced_weights() {
        let wanted = weight.replace('\\', "/");
        let found = on_disk
            .iter()
            .any(|path| path == &wanted || path.ends_with(&format!("/{}", wanted)));
        if found {
            report.present.push(weight);
        } else {
            report.missing.push(weight);
        }
    }
    report
}
