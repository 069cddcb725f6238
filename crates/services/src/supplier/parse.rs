use serde_json::Value;
use tracing::debug;
use tutor_core::model::{Difficulty, Provenance, Question, QuestionDraft};

/// Questions recovered from a generation response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedBatch {
    pub questions: Vec<Question>,
    /// Items that were present but failed validation.
    pub rejected: usize,
}

/// Failure to find any JSON question payload in a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedResponse(pub String);

/// Extract the outermost JSON array (or a lone object) from free text and
/// validate every item as a question.
///
/// Items that do not deserialize or validate are counted in
/// `ParsedBatch::rejected` and dropped. Every accepted question is tagged
/// with `difficulty` and `Provenance::Generated`.
///
/// # Errors
///
/// Returns `MalformedResponse` if no JSON value can be parsed at all.
pub fn parse_questions(
    raw: &str,
    difficulty: Difficulty,
) -> Result<ParsedBatch, MalformedResponse> {
    let payload = json_slice(raw);
    let value: Value =
        serde_json::from_str(payload).map_err(|e| MalformedResponse(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(MalformedResponse(format!(
                "expected an array of questions, got {}",
                kind(&other)
            )));
        }
    };

    let mut batch = ParsedBatch::default();
    for (index, item) in items.into_iter().enumerate() {
        let question = serde_json::from_value::<QuestionDraft>(item)
            .map_err(|e| e.to_string())
            .and_then(|mut draft| {
                draft.difficulty = difficulty;
                draft.provenance = Provenance::Generated;
                draft.validate().map_err(|e| e.to_string())
            });
        match question {
            Ok(question) => batch.questions.push(question),
            Err(reason) => {
                debug!(index, %reason, "dropping generated question");
                batch.rejected += 1;
            }
        }
    }
    Ok(batch)
}

fn json_slice(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => &trimmed[start..=end],
            _ => trimmed,
        },
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
