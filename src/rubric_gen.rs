//! Ask the judge model for a 1-5 rubric per role and write `rubric_<role>.json`.

use regex::Regex;
use serde_json::{json, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use crate::error::{CrasError, Result};
use crate::judge::{GenParams, Judge};
use crate::prompts::build_rubric_prompt;

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*\n(.*?)\n\s*```").expect("fenced rubric regex"))
}

/// JSON text the response most likely holds: a ```json block, else the
/// span from the first `{` to the last `}`.
fn json_candidate(response: &str) -> Option<&str> {
    if let Some(c) = fenced_re().captures(response) {
        return c.get(1).map(|m| m.as_str().trim());
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

/// Parsed rubric, or `{"role", "raw_output"}` when nothing parseable was found.
pub fn extract_rubric_json(response: &str, role: &str) -> (Value, bool) {
    match json_candidate(response).map(serde_json::from_str::<Value>) {
        Some(Ok(v)) => (v, true),
        _ => (json!({"role": role, "raw_output": response}), false),
    }
}

pub fn rubric_file_name(role: &str) -> String {
    format!("rubric_{}.json", role.to_lowercase())
}

/// Roles that got a file and roles whose judge call failed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub written: Vec<PathBuf>,
    pub raw_fallbacks: Vec<String>,
    pub failed: Vec<String>,
}

/// Generate one rubric file per role into `out_dir`. A failed call is logged
/// and the next role is tried; only filesystem errors abort.
pub async fn generate_rubrics(
    judge: &dyn Judge,
    roles: &[String],
    out_dir: &Path,
    params: GenParams,
) -> Result<GenerationReport> {
    fs::create_dir_all(out_dir).map_err(|e| CrasError::io(out_dir, e))?;
    let mut report = GenerationReport::default();

    for role in roles {
        println!("[+] Generating rubric for: {role}");
        log::info!("generating rubric for role '{role}' with {}", judge.model());

        let completion = match judge.complete(&build_rubric_prompt(role), params).await {
            Ok(c) => c,
            Err(e) => {
                println!("[!] Rubric request failed for role {role}: {e}");
                log::error!("rubric request for role '{role}' failed: {e}");
                report.failed.push(role.clone());
                continue;
            }
        };
        if let Some(u) = completion.usage {
            log::info!(
                "rubric '{role}' usage prompt={} completion={}",
                u.prompt_tokens,
                u.completion_tokens
            );
        }

        let (rubric, parsed) = extract_rubric_json(&completion.text, role);
        if !parsed {
            println!("[!] Could not find or parse JSON block for role {role}. Saving raw output.");
            log::warn!("rubric response for role '{role}' is not JSON, saving raw output");
            report.raw_fallbacks.push(role.clone());
        }

        let path = out_dir.join(rubric_file_name(role));
        let body = serde_json::to_string_pretty(&rubric)?;
        fs::write(&path, body).map_err(|e| CrasError::io(&path, e))?;
        log::info!("wrote {}", path.display());
        report.written.push(path);
    }

    println!("[✓] Rubric generation complete.");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::Completion;
    use crate::rubric::load_rubric;
    use async_trait::async_trait;

    #[test]
    fn fenced_block_wins() {
        let resp = "Sure!\n```json\n{\"role\": \"Logician\", \"rubric\": {}}\n```\n{ignored}";
        let (v, ok) = extract_rubric_json(resp, "Logician");
        assert!(ok);
        assert_eq!(v["role"], "Logician");
    }

    #[test]
    fn falls_back_to_outer_braces() {
        let (v, ok) = extract_rubric_json("prefix {\"rubric\": {\"GA\": {\"1\": \"x\"}}} suffix", "R");
        assert!(ok);
        assert_eq!(v["rubric"]["GA"]["1"], "x");
    }

    #[test]
    fn unparseable_response_is_kept_raw() {
        for resp in ["no json here", "} backwards {", "{broken"] {
            let (v, ok) = extract_rubric_json(resp, "Physicist");
            assert!(!ok);
            assert_eq!(v, json!({"role": "Physicist", "raw_output": resp}));
        }
    }

    struct ScriptedJudge;

    #[async_trait]
    impl Judge for ScriptedJudge {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str, _params: GenParams) -> Result<Completion> {
            if prompt.contains("\"Broken\"") {
                return Err(CrasError::Api("503 Service Unavailable".into()));
            }
            if prompt.contains("\"Poet\"") {
                return Ok(Completion {
                    text: "I would rather write a sonnet.".into(),
                    usage: None,
                });
            }
            Ok(Completion {
                text: "```json\n{\"role\": \"Logician\", \"rubric\": {\"GA\": {\"1\": \"bad\", \"5\": \"good\"}}}\n```"
                    .into(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn writes_one_file_per_role_and_survives_failures() {
        let dir = tempfile::tempdir().unwrap();
        let roles: Vec<String> = ["Logician", "Broken", "Poet"].iter().map(|s| s.to_string()).collect();
        let params = GenParams {
            temperature: 0.3,
            max_tokens: 3054,
        };

        let report = generate_rubrics(&ScriptedJudge, &roles, dir.path(), params).await.unwrap();
        assert_eq!(report.failed, ["Broken"]);
        assert_eq!(report.raw_fallbacks, ["Poet"]);
        assert_eq!(report.written.len(), 2);
        assert!(!dir.path().join("rubric_broken.json").exists());

        // the generated file is directly usable by the scorer
        let rubric = load_rubric("Logician", dir.path()).unwrap();
        assert_eq!(rubric.dimensions[0].code, "GA");

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("rubric_poet.json")).unwrap()).unwrap();
        assert_eq!(raw["raw_output"], "I would rather write a sonnet.");
    }
}
