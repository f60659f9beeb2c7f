//! Transcript files produced by the multi-agent frameworks.
//!
//! Every framework (`method`) writes its turn records with different field
//! names; [`TurnRecord`] carries one variant per known method plus a generic
//! fallback, and [`TurnRecord::extract`] maps each onto (role, question, answer).

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::{fs, path::Path};

use crate::error::{CrasError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    AutoGenMain,
    DyLanMain,
    DyLanMmlu,
    MacNetMain,
    SelfConsistency,
    Other(String),
}

impl Method {
    pub fn parse(s: &str) -> Self {
        match s {
            "AutoGen_Main" => Self::AutoGenMain,
            "DyLAN_Main" => Self::DyLanMain,
            "DyLAN_MMLU" => Self::DyLanMmlu,
            "MacNet_Main" => Self::MacNetMain,
            "SelfConsistency" => Self::SelfConsistency,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::AutoGenMain => "AutoGen_Main",
            Self::DyLanMain => "DyLAN_Main",
            Self::DyLanMmlu => "DyLAN_MMLU",
            Self::MacNetMain => "MacNet_Main",
            Self::SelfConsistency => "SelfConsistency",
            Self::Other(s) => s,
        }
    }
}

// accept any JSON value for a text field: strings as-is, null as empty,
// everything else as its JSON text
fn de_text<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

fn de_opt_text<'de, D>(de: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// integer or integral float; anything else means "no round"
fn de_round<'de, D>(de: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentTurn {
    #[serde(default, deserialize_with = "de_text")]
    pub role: String,
    #[serde(default, deserialize_with = "de_text")]
    pub content: String,
    #[serde(default, deserialize_with = "de_round")]
    pub round: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReplyTurn {
    #[serde(default, deserialize_with = "de_text")]
    pub role: String,
    #[serde(default, deserialize_with = "de_text")]
    pub reply: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActorTurn {
    #[serde(default, deserialize_with = "de_text")]
    pub system_message: String,
    #[serde(default, deserialize_with = "de_text")]
    pub actor_prompt: String,
    #[serde(default, deserialize_with = "de_text")]
    pub actor_response: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenericTurn {
    #[serde(default, deserialize_with = "de_text")]
    pub role: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub question: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub parsed_answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnRecord {
    AutoGen(ContentTurn),
    DyLan(ReplyTurn),
    MacNet(ActorTurn),
    SelfConsistency(ContentTurn),
    Generic(GenericTurn),
}

/// Uniform view of one turn, ready for prompting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub role: String,
    pub question: String,
    pub answer: String,
}

impl Extracted {
    pub fn is_scorable(&self) -> bool {
        !self.role.is_empty() && !self.answer.is_empty()
    }
}

// non-object records deserialize to an all-empty turn, which is never scored
fn fields<T: for<'de> Deserialize<'de> + Default>(v: &Value) -> T {
    T::deserialize(v).unwrap_or_default()
}

impl TurnRecord {
    pub fn from_value(method: &Method, v: &Value) -> Self {
        match method {
            Method::AutoGenMain => Self::AutoGen(fields(v)),
            Method::DyLanMain | Method::DyLanMmlu => Self::DyLan(fields(v)),
            Method::MacNetMain => Self::MacNet(fields(v)),
            Method::SelfConsistency => Self::SelfConsistency(fields(v)),
            Method::Other(_) => Self::Generic(fields(v)),
        }
    }

    /// Round-0 turns of AutoGen and SelfConsistency are setup turns.
    pub fn should_skip(&self) -> bool {
        match self {
            Self::AutoGen(t) | Self::SelfConsistency(t) => t.round == Some(0),
            Self::DyLan(_) | Self::MacNet(_) | Self::Generic(_) => false,
        }
    }

    pub fn extract(&self, original_query: &str) -> Extracted {
        let (role, question, answer) = match self {
            Self::AutoGen(t) | Self::SelfConsistency(t) => {
                (t.role.clone(), original_query.to_string(), t.content.clone())
            }
            Self::DyLan(t) => (t.role.clone(), original_query.to_string(), t.reply.clone()),
            Self::MacNet(t) => (
                format!("{} {}", t.system_message, t.actor_prompt).trim().to_string(),
                original_query.to_string(),
                t.actor_response.clone(),
            ),
            Self::Generic(t) => (
                t.role.clone(),
                t.question.clone().unwrap_or_else(|| original_query.to_string()),
                t.parsed_answer.clone(),
            ),
        };
        Extracted {
            role,
            question,
            answer,
        }
    }

    /// Not a skipped round, and both role and answer are present.
    pub fn scorable(&self, original_query: &str) -> Option<Extracted> {
        if self.should_skip() {
            return None;
        }
        Some(self.extract(original_query)).filter(Extracted::is_scorable)
    }
}

#[derive(Debug, Deserialize)]
struct RawTranscript {
    #[serde(default, deserialize_with = "de_text")]
    method: String,
    #[serde(default, deserialize_with = "de_text")]
    query: String,
    #[serde(default)]
    history: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub method: Method,
    pub query: String,
    pub history: Vec<TurnRecord>,
}

impl Transcript {
    pub fn from_json(raw: &str) -> Result<Self> {
        let t: RawTranscript = serde_json::from_str(raw)?;
        let method = Method::parse(&t.method);
        let history = t
            .history
            .iter()
            .map(|v| TurnRecord::from_value(&method, v))
            .collect();
        Ok(Self {
            method,
            query: t.query,
            history,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| CrasError::io(path, e))?;
        Self::from_json(&raw)
    }

    /// Records that would reach the judge, in history order.
    pub fn scorable_records(&self) -> Vec<(&TurnRecord, Extracted)> {
        self.history
            .iter()
            .filter_map(|r| r.scorable(&self.query).map(|e| (r, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(method: &str, v: Value) -> TurnRecord {
        TurnRecord::from_value(&Method::parse(method), &v)
    }

    #[test]
    fn dispatch_table() {
        let q = "original?";

        let e = rec("AutoGen_Main", json!({"role": "Coder", "content": "c", "round": 1})).extract(q);
        assert_eq!((e.role.as_str(), e.question.as_str(), e.answer.as_str()), ("Coder", q, "c"));

        for m in ["DyLAN_Main", "DyLAN_MMLU"] {
            let e = rec(m, json!({"role": "Critic", "reply": "r", "content": "ignored"})).extract(q);
            assert_eq!((e.role.as_str(), e.answer.as_str()), ("Critic", "r"));
        }

        let e = rec(
            "MacNet_Main",
            json!({"system_message": "You are a Physicist.", "actor_prompt": "Solve it.", "actor_response": "42"}),
        )
        .extract(q);
        assert_eq!(e.role, "You are a Physicist. Solve it.");
        assert_eq!(e.answer, "42");

        let e = rec("SelfConsistency", json!({"role": "Solver", "content": "s"})).extract(q);
        assert_eq!((e.role.as_str(), e.answer.as_str()), ("Solver", "s"));
    }

    #[test]
    fn macnet_role_is_trimmed_when_one_part_missing() {
        let e = rec("MacNet_Main", json!({"actor_prompt": "Judge", "actor_response": "ok"})).extract("q");
        assert_eq!(e.role, "Judge");
    }

    #[test]
    fn unknown_method_uses_question_and_parsed_answer() {
        let r = rec("SomethingNew", json!({"role": "Agent", "question": "sub-q", "parsed_answer": "a"}));
        let e = r.extract("original");
        assert_eq!(e.question, "sub-q");
        assert_eq!(e.answer, "a");

        let e = rec("", json!({"role": "Agent", "parsed_answer": "a"})).extract("original");
        assert_eq!(e.question, "original");
    }

    #[test]
    fn round_zero_is_skipped_only_for_autogen_and_self_consistency() {
        assert!(rec("AutoGen_Main", json!({"role": "a", "content": "b", "round": 0})).should_skip());
        assert!(rec("SelfConsistency", json!({"role": "a", "content": "b", "round": 0.0})).should_skip());
        assert!(!rec("AutoGen_Main", json!({"role": "a", "content": "b", "round": 2})).should_skip());
        assert!(!rec("AutoGen_Main", json!({"role": "a", "content": "b"})).should_skip());
        assert!(!rec("AutoGen_Main", json!({"role": "a", "content": "b", "round": "0"})).should_skip());
        assert!(!rec("DyLAN_Main", json!({"role": "a", "reply": "b", "round": 0})).should_skip());
    }

    #[test]
    fn empty_role_or_answer_is_not_scorable() {
        assert!(rec("AutoGen_Main", json!({"role": "", "content": "b"})).scorable("q").is_none());
        assert!(rec("AutoGen_Main", json!({"role": "a", "content": null})).scorable("q").is_none());
        assert!(rec("DyLAN_Main", json!({"role": "a"})).scorable("q").is_none());
        assert!(rec("DyLAN_Main", json!("not an object")).scorable("q").is_none());
    }

    #[test]
    fn non_string_answers_render_as_json_text() {
        let e = rec("AutoGen_Main", json!({"role": "a", "content": {"x": 1}})).extract("q");
        assert_eq!(e.answer, r#"{"x":1}"#);
    }

    #[test]
    fn transcript_lists_scorable_records_in_order() {
        let t = Transcript::from_json(
            &json!({
                "method": "AutoGen_Main",
                "query": "What is 2+2?",
                "history": [
                    {"role": "Planner", "content": "setup", "round": 0},
                    {"role": "Solver", "content": "4", "round": 1},
                    {"role": "Checker", "content": "", "round": 1},
                    {"role": "Solver", "content": "still 4", "round": 2}
                ]
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(t.method, Method::AutoGenMain);
        assert_eq!(t.history.len(), 4);
        let answers: Vec<_> = t.scorable_records().into_iter().map(|(_, e)| e.answer).collect();
        assert_eq!(answers, ["4", "still 4"]);
    }

    #[test]
    fn transcript_without_fields_is_empty() {
        let t = Transcript::from_json("{}").unwrap();
        assert_eq!(t.method, Method::Other(String::new()));
        assert!(t.history.is_empty());
    }
}
