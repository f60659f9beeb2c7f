//! Per-role rubric files: `rubric_<role>.json` with `rubric_general.json` as fallback.

use serde_json::Value;
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::error::{CrasError, Result};

/// Roles longer than this are free-form prompts, not file-safe names.
pub const MAX_ROLE_NAME_CHARS: usize = 15;

pub const GENERAL_RUBRIC_FILE: &str = "rubric_general.json";

/// One scoring dimension (e.g. "GA") with its level descriptions in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub code: String,
    pub levels: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rubric {
    pub dimensions: Vec<Dimension>,
}

impl Rubric {
    /// Parse the content of a rubric file: `{"role": ..., "rubric": {dim: {level: text}}}`.
    pub fn from_file_value(v: &Value) -> std::result::Result<Self, String> {
        let dims = v
            .get("rubric")
            .and_then(Value::as_object)
            .ok_or_else(|| "missing \"rubric\" object".to_string())?;

        let mut dimensions = Vec::with_capacity(dims.len());
        for (code, levels) in dims {
            let levels = levels
                .as_object()
                .ok_or_else(|| format!("dimension {code} is not an object"))?;
            dimensions.push(Dimension {
                code: code.clone(),
                levels: levels
                    .iter()
                    .map(|(lvl, desc)| (lvl.clone(), value_text(desc)))
                    .collect(),
            });
        }
        Ok(Self { dimensions })
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Candidate files for `role`, in lookup order.
pub fn rubric_candidates(role: &str, rubric_dir: &Path) -> Vec<PathBuf> {
    let general = rubric_dir.join(GENERAL_RUBRIC_FILE);
    if role.chars().count() > MAX_ROLE_NAME_CHARS {
        return vec![general];
    }
    vec![
        rubric_dir.join(format!("rubric_{}.json", role.to_lowercase())),
        general,
    ]
}

/// Resolve and read the rubric for `role` without caching.
pub fn load_rubric(role: &str, rubric_dir: &Path) -> Result<Rubric> {
    let (path, rubric) = resolve(role, rubric_dir, read_rubric)?;
    log::debug!("rubric for '{role}' read from {}", path.display());
    Ok(rubric)
}

// Walks the candidates and stops at the first file that exists.
fn resolve<T, F>(role: &str, rubric_dir: &Path, mut read: F) -> Result<(PathBuf, T)>
where
    F: FnMut(&Path) -> Result<Option<T>>,
{
    let candidates = rubric_candidates(role, rubric_dir);
    if candidates.len() == 1 {
        log::info!(
            "role name too long ({} chars), using general rubric for '{}'",
            role.chars().count(),
            role.chars().take(50).collect::<String>()
        );
    }
    for (i, path) in candidates.iter().enumerate() {
        if let Some(rubric) = read(path)? {
            if i > 0 {
                log::info!("using general rubric for role '{role}' (specific rubric not found)");
            }
            return Ok((path.clone(), rubric));
        }
    }
    Err(CrasError::RubricNotFound {
        role: role.to_string(),
        dir: rubric_dir.to_path_buf(),
    })
}

// Ok(None) when the file does not exist.
fn read_rubric(path: &Path) -> Result<Option<Rubric>> {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CrasError::io(path, e)),
    };
    let v: Value = serde_json::from_str(&raw).map_err(|e| CrasError::InvalidRubric {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Rubric::from_file_value(&v)
        .map(Some)
        .map_err(|reason| CrasError::InvalidRubric {
            path: path.to_path_buf(),
            reason,
        })
}

/// Rubric lookup with a path-keyed cache, shared by all workers of a run.
#[derive(Debug)]
pub struct RubricStore {
    dir: PathBuf,
    cache: Mutex<HashMap<PathBuf, Arc<Rubric>>>,
}

impl RubricStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, role: &str) -> Result<Arc<Rubric>> {
        let (path, rubric) = resolve(role, &self.dir, |p| match self.cached(p) {
            Some(r) => Ok(Some(r)),
            None => Ok(read_rubric(p)?.map(Arc::new)),
        })?;
        self.lock().entry(path).or_insert_with(|| rubric.clone());
        Ok(rubric)
    }

    fn cached(&self, path: &Path) -> Option<Arc<Rubric>> {
        self.lock().get(path).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<Rubric>>> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_rubric(dir: &Path, file: &str, tag: &str) {
        let body = json!({
            "role": tag,
            "rubric": {
                "GA": { "1": format!("{tag} ga poor"), "5": format!("{tag} ga great") },
                "RC": { "1": "rc poor", "5": "rc great" }
            }
        });
        fs::write(dir.join(file), body.to_string()).unwrap();
    }

    #[test]
    fn specific_rubric_wins_over_general() {
        let dir = tempfile::tempdir().unwrap();
        write_rubric(dir.path(), "rubric_physicist.json", "physicist");
        write_rubric(dir.path(), GENERAL_RUBRIC_FILE, "general");

        let r = load_rubric("Physicist", dir.path()).unwrap();
        assert_eq!(r.dimensions[0].code, "GA");
        assert_eq!(r.dimensions[0].levels[0].1, "physicist ga poor");
    }

    #[test]
    fn falls_back_to_general_when_specific_missing() {
        let dir = tempfile::tempdir().unwrap();
        write_rubric(dir.path(), GENERAL_RUBRIC_FILE, "general");

        let r = load_rubric("Logician", dir.path()).unwrap();
        assert_eq!(r.dimensions[0].levels[1].1, "general ga great");
    }

    #[test]
    fn long_role_never_consults_specific_file() {
        let role = "SoftwareEngineerWithTenYearsOfExperience";
        let dir = tempfile::tempdir().unwrap();
        write_rubric(dir.path(), GENERAL_RUBRIC_FILE, "general");
        // a specific file that would otherwise match
        write_rubric(
            dir.path(),
            &format!("rubric_{}.json", role.to_lowercase()),
            "specific",
        );

        let candidates = rubric_candidates(role, dir.path());
        assert_eq!(candidates, vec![dir.path().join(GENERAL_RUBRIC_FILE)]);

        let r = load_rubric(role, dir.path()).unwrap();
        assert_eq!(r.dimensions[0].levels[0].1, "general ga poor");
    }

    #[test]
    fn fifteen_chars_is_still_a_file_name() {
        let role = "ProjectManager1"; // 15 chars
        assert_eq!(rubric_candidates(role, Path::new("r")).len(), 2);
    }

    #[test]
    fn both_missing_is_rubric_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_rubric("Chemist", dir.path()).unwrap_err();
        assert!(matches!(err, CrasError::RubricNotFound { ref role, .. } if role == "Chemist"));
    }

    #[test]
    fn malformed_rubric_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rubric_chemist.json"), r#"{"role":"x","raw_output":"..."}"#)
            .unwrap();
        let err = load_rubric("Chemist", dir.path()).unwrap_err();
        assert!(matches!(err, CrasError::InvalidRubric { .. }));
    }

    #[test]
    fn dimension_order_follows_file() {
        let v = json!({"rubric": {"KBA": {"1": "a"}, "GA": {"1": "b"}, "CC": {"1": 3}}});
        let r = Rubric::from_file_value(&v).unwrap();
        let codes: Vec<_> = r.dimensions.iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, ["KBA", "GA", "CC"]);
        assert_eq!(r.dimensions[2].levels[0].1, "3");
    }

    #[test]
    fn store_serves_cached_copy_after_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_rubric(dir.path(), "rubric_logician.json", "logician");
        let store = RubricStore::new(dir.path());

        let first = store.get("Logician").unwrap();
        write_rubric(dir.path(), "rubric_logician.json", "changed");
        let second = store.get("Logician").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.dimensions[0].levels[0].1, "logician ga poor");
    }

    #[test]
    fn store_reports_missing_rubrics() {
        let dir = tempfile::tempdir().unwrap();
        let store = RubricStore::new(dir.path());
        assert!(matches!(
            store.get("Chemist").unwrap_err(),
            CrasError::RubricNotFound { .. }
        ));
    }
}
