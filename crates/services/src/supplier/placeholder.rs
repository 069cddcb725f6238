use tutor_core::model::Question;

use super::SupplyRequest;

/// Generic questions used when no data source produced anything.
///
/// Always yields exactly `request.count` items.
#[must_use]
pub fn placeholder_questions(request: &SupplyRequest) -> Vec<Question> {
    (1..=request.count)
        .map(|n| {
            Question::placeholder(
                n,
                &request.topic_title,
                &request.lesson_title,
                request.difficulty,
            )
        })
        .collect()
}
