//! Stage contracts: turn repaired JSON into typed, validated artifacts.
//!
//! Any contract violation is [`CoursesmithError::MalformedOutput`], which the
//! worker pool retries within its budget.

use serde_json::{Map, Value};

use coursesmith_shared::{
    CoursesmithError, Mcq, Module, OutlineShape, Result, TopicContent, canonical_title,
};

/// A validated artifact for one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Name(String),
    Outline(Vec<Module>),
    Topic(TopicContent),
}

fn as_object<'a>(value: &'a Value, stage: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| CoursesmithError::malformed(format!("{stage} output is not a JSON object")))
}

fn string_list(obj: &Map<String, Value>, field: &str) -> Result<Vec<String>> {
    let items = obj
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| CoursesmithError::malformed(format!("missing or invalid '{field}' array")))?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| CoursesmithError::malformed(format!("'{field}' holds a non-string")))
        })
        .filter(|item| !matches!(item, Ok(s) if s.is_empty()))
        .collect()
}

// ---------------------------------------------------------------------------
// Name
// ---------------------------------------------------------------------------

/// `{ "suggestion": string }`.
pub fn validate_name(value: &Value) -> Result<String> {
    let obj = as_object(value, "name")?;
    let suggestion = obj
        .get("suggestion")
        .and_then(Value::as_str)
        .map(canonical_title)
        .unwrap_or_default();

    if suggestion.is_empty() {
        return Err(CoursesmithError::malformed(
            "missing 'suggestion' field in name output",
        ));
    }
    Ok(suggestion)
}

// ---------------------------------------------------------------------------
// Outline
// ---------------------------------------------------------------------------

fn placeholder_topics(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("Topic {i}")).collect()
}

/// `{ "modules": [ { "title", "submodules": [string] } ] }`, normalized to
/// `shape`.
///
/// Extra modules and topics are cut. A module without a title becomes
/// `Module N`; a module without usable topics, and every missing module, gets
/// `Topic 1..N` placeholders. No modules at all is malformed.
pub fn validate_outline(value: &Value, shape: OutlineShape) -> Result<Vec<Module>> {
    let obj = as_object(value, "outline")?;
    let raw_modules = obj
        .get("modules")
        .and_then(Value::as_array)
        .ok_or_else(|| CoursesmithError::malformed("missing or invalid 'modules' array"))?;

    if raw_modules.is_empty() {
        return Err(CoursesmithError::malformed("outline has no modules"));
    }

    let mut modules: Vec<Module> = raw_modules
        .iter()
        .take(shape.modules)
        .enumerate()
        .map(|(i, raw)| {
            let title = raw
                .get("title")
                .and_then(Value::as_str)
                .map(canonical_title)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("Module {}", i + 1));

            let mut submodules: Vec<String> = raw
                .get("submodules")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(canonical_title)
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            submodules.truncate(shape.topics);
            if submodules.is_empty() {
                submodules = placeholder_topics(shape.topics);
            }

            Module { title, submodules }
        })
        .collect();

    while modules.len() < shape.modules {
        modules.push(Module {
            title: format!("Module {}", modules.len() + 1),
            submodules: placeholder_topics(shape.topics),
        });
    }

    Ok(modules)
}

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

fn validate_mcq(raw: &Value, index: usize) -> Result<Mcq> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CoursesmithError::malformed(format!("mcq {index} is not an object")))?;

    let question = obj
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| CoursesmithError::malformed(format!("mcq {index} has no question")))?
        .to_string();

    let options = string_list(obj, "options")?;
    if options.len() < 2 {
        return Err(CoursesmithError::malformed(format!(
            "mcq {index} needs at least two options"
        )));
    }

    let answer = obj
        .get("answer")
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| CoursesmithError::malformed(format!("mcq {index} has no answer")))?;

    // Stored answers are always the option's own text.
    let wanted = answer.to_lowercase();
    let answer = options
        .iter()
        .find(|opt| opt.to_lowercase() == wanted)
        .cloned()
        .ok_or_else(|| {
            CoursesmithError::malformed(format!(
                "mcq {index} answer '{answer}' is not one of its options"
            ))
        })?;

    Ok(Mcq {
        question,
        options,
        answer,
    })
}

/// `{ "text", "videos", "mcqs", "extraQuestions" }`, all four arrays required.
pub fn validate_topic(value: &Value) -> Result<TopicContent> {
    let obj = as_object(value, "topic")?;

    let text = string_list(obj, "text")?;
    if text.is_empty() {
        return Err(CoursesmithError::malformed("topic 'text' has no paragraphs"));
    }
    let videos = string_list(obj, "videos")?;
    let extra_questions = string_list(obj, "extraQuestions")?;

    let mcqs = obj
        .get("mcqs")
        .and_then(Value::as_array)
        .ok_or_else(|| CoursesmithError::malformed("missing or invalid 'mcqs' array"))?
        .iter()
        .enumerate()
        .map(|(i, raw)| validate_mcq(raw, i))
        .collect::<Result<Vec<_>>>()?;

    Ok(TopicContent {
        text,
        videos,
        mcqs,
        extra_questions,
    })
}
