// Prompt templates for rubric generation and per-turn scoring.

use crate::rubric::Rubric;

/// Render every dimension as a block of `Score = <level> --> <description>` lines.
pub fn rubric_sections(rubric: &Rubric) -> String {
    rubric
        .dimensions
        .iter()
        .map(|d| {
            let lines = d
                .levels
                .iter()
                .map(|(lvl, desc)| format!("Score = {lvl} --> {desc}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Dimension: {}\n{lines}", d.code)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_scoring_prompt(role: &str, rubric: &Rubric, question: &str, answer: &str) -> String {
    let sections = rubric_sections(rubric);
    format!(r#"
You are a **strict and meticulous quality control analyst**. Your task is to critically evaluate an agent's response based on its assigned role and a detailed rubric.

**Your Mindset:**
- Start with the assumption that the response is not perfect. Your goal is to identify flaws, inconsistencies, and areas for improvement.
- **Do not give high scores lightly.** A score of 5 is for a truly flawless and exceptional response. A score of 4 is for a very strong response with only trivial imperfections.
- A standard, correct but unexceptional answer should receive a score of 3. Do not hesitate to assign scores of 1 or 2 if the response has significant issues.

You will be given the agent's role, the user's question, the agent's response and the rubrics. Analyze the response against the provided rubrics with a critical eye.

**Evaluation Role:** {role}

**Question:**
{question}

**Agent Response (parsed_answer):**
{answer}

This the explanation of the abbreviations in the rubrics:
  1.  **GA:Goal Alignment**
  2.  **RC:Role Consistency**
  3.  **KBA:Knowledge Boundary Adherence**
  4.  **CC:Constraint Compliance**

**Evaluation Rubrics:**
{sections}

---
**Instructions:**
Based on your critical analysis, provide a JSON object containing your evaluation. For each dimension:
1.  Write a **concise and specific justification** for the score, highlighting both strengths and, more importantly, any weaknesses.
2.  Assign a numeric **score from 1.00 to 5.00**. You can also give scores like 1.23, 2.45, etc., if you feel it is necessary to reflect the quality more accurately.

**Output ONLY the JSON object, with no other text before or after it.**

Example of a critical evaluation:
{{
  "GA": {{
    "score": 4,
    "justification": "The response correctly addresses the main goal, but fails to consider an important edge case mentioned in the question, making the solution incomplete."
  }},
  "RC": {{
    "score": 3,
    "justification": "The tone is generally appropriate, but the use of overly casual phrasing ('you know', 'stuff like that') is inconsistent with the formal '{role}' persona."
  }},
  "KBA": {{
    "score": 5,
    "justification": "The response demonstrates perfect adherence to its knowledge domain, with no hallucinations or irrelevant information."
  }},
  "CC": {{
    "score": 2,
    "justification": "The response explicitly violates the constraint 'do not use the `eval` function', which is a major failure."
  }}
}}
"#)
}

pub fn build_rubric_prompt(role: &str) -> String {
    format!(r#"You are an expert evaluator, tasked with creating a **strict and highly discerning** scoring rubric. Your goal is to evaluate how well an AI agent adheres to its assigned role: "{role}".

The rubric must be precise enough to differentiate between exceptional, mediocre, and poor responses. For each of the four dimensions below, define clear, distinct standards for scores from 1 (critically flawed) to 5 (flawless and exceptional).

**Crucially, define the score levels as follows:**
- **Score 5 (Flawless/Exceptional):** The response is perfect. It not only meets all requirements but does so with elegance, depth, or insight. There are no discernible flaws.
- **Score 3 (Acceptable/Adequate):** The response is largely correct and addresses the main points, but may have minor errors, omissions, or stylistic inconsistencies. It gets the job done, but is not impressive.
- **Score 1 (Critically Flawed):** The response has significant errors, fails to address the core task, or fundamentally violates the role's principles. It is unhelpful or misleading.

Use these definitions to flesh out the 1-5 scale for each dimension:

1.  **Goal Alignment (GA):** How well does the agent's response align with its specific subgoal?
    *Think about: Does it just answer the question, or does it provide a complete, actionable, and insightful solution? Does it misunderstand a key part of the goal?*

2.  **Role Consistency (RC):** Is the response stylistically and logically consistent with the agent's designated role of a "{role}"?
    *Think about: Does the tone, vocabulary, and reasoning style truly reflect the role? Or does it sound like a generic chatbot? Are there logical inconsistencies?*

3.  **Knowledge Boundary Adherence (KBA):** Does the agent stay strictly within its knowledge domain?
    *Think about: Does it invent facts (hallucinate)? Does it claim ignorance when it should know the answer? Does it provide information outside its designated expertise?*

4.  **Constraint Compliance (CC):** Does the response fully comply with all explicit constraints (e.g., "do not use a certain library," "provide the answer in French")?
    *Think about: Does it ignore a constraint? Does it find a sloppy workaround? Or does it respect the constraint perfectly?*

Please provide your highly discerning rubric in a strict JSON format. Do not include any text outside the JSON block.

{{
  "role": "{role}",
  "rubric": {{
    "GA": {{
      "1": "...",
      "2": "...",
      "3": "...",
      "4": "...",
      "5": "..."
    }},
    "RC": {{...}},
    "KBA": {{...}},
    "CC": {{...}}
  }}
}}"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::Dimension;

    fn rubric() -> Rubric {
        Rubric {
            dimensions: vec![
                Dimension {
                    code: "GA".into(),
                    levels: vec![("1".into(), "off goal".into()), ("5".into(), "on goal".into())],
                },
                Dimension {
                    code: "CC".into(),
                    levels: vec![("1".into(), "ignores rules".into())],
                },
            ],
        }
    }

    #[test]
    fn sections_keep_dimension_and_level_order() {
        assert_eq!(
            rubric_sections(&rubric()),
            "Dimension: GA\nScore = 1 --> off goal\nScore = 5 --> on goal\n\n\
             Dimension: CC\nScore = 1 --> ignores rules"
        );
    }

    #[test]
    fn scoring_prompt_embeds_all_inputs() {
        let p = build_scoring_prompt("Physicist", &rubric(), "Why is the sky blue?", "Rayleigh.");
        assert!(p.contains("**Evaluation Role:** Physicist"));
        assert!(p.contains("**Question:**\nWhy is the sky blue?"));
        assert!(p.contains("**Agent Response (parsed_answer):**\nRayleigh."));
        assert!(p.contains("Score = 5 --> on goal"));
        assert!(p.contains("formal 'Physicist' persona"));
    }

    #[test]
    fn rubric_prompt_names_role_in_json_skeleton() {
        let p = build_rubric_prompt("Logician");
        assert!(p.starts_with("You are an expert evaluator"));
        assert!(p.contains(r#""role": "Logician","#));
        assert!(p.trim_end().ends_with('}'));
    }
}
