use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::model::{Curriculum, LessonId, LessonProgress, LessonStatus, TopicId};

/// Which topics and lessons a learner may open right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Availability {
    unlocked_topics: BTreeSet<TopicId>,
    unlocked_lessons: BTreeMap<TopicId, BTreeSet<LessonId>>,
}

impl Availability {
    #[must_use]
    pub fn unlocked_topics(&self) -> &BTreeSet<TopicId> {
        &self.unlocked_topics
    }

    #[must_use]
    pub fn unlocked_lessons(&self) -> &BTreeMap<TopicId, BTreeSet<LessonId>> {
        &self.unlocked_lessons
    }

    /// Unlocked lessons of one topic; `None` for a locked or unknown topic.
    #[must_use]
    pub fn lessons(&self, topic: &TopicId) -> Option<&BTreeSet<LessonId>> {
        self.unlocked_lessons.get(topic)
    }

    #[must_use]
    pub fn is_topic_unlocked(&self, topic: &TopicId) -> bool {
        self.unlocked_topics.contains(topic)
    }

    #[must_use]
    pub fn is_lesson_unlocked(&self, topic: &TopicId, lesson: LessonId) -> bool {
        self.lessons(topic).is_some_and(|set| set.contains(&lesson))
    }

    /// Combine lock state with the lesson's own progress.
    #[must_use]
    pub fn status(
        &self,
        topic: &TopicId,
        lesson: LessonId,
        progress: Option<&LessonProgress>,
    ) -> LessonStatus {
        match progress {
            Some(p) if p.is_completed() => LessonStatus::Completed,
            _ if !self.is_lesson_unlocked(topic, lesson) => LessonStatus::Locked,
            Some(p) => p.status(),
            None => LessonStatus::Available,
        }
    }
}

/// Derives accessible content from a progress snapshot.
///
/// Every topic is open. Inside a topic the first lesson is open and each
/// following lesson opens once the lesson before it is completed. Nothing is
/// cached; callers evaluate it on every read.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlockPolicy;

impl UnlockPolicy {
    #[must_use]
    pub fn available(curriculum: &Curriculum, progress: &[LessonProgress]) -> Availability {
        let completed: HashSet<(&TopicId, LessonId)> = progress
            .iter()
            .filter(|row| row.is_completed())
            .map(|row| (row.topic_id(), row.lesson_id()))
            .collect();

        let mut availability = Availability::default();
        for topic in curriculum.topics() {
            availability.unlocked_topics.insert(topic.id.clone());

            let mut lessons = BTreeSet::new();
            let mut previous: Option<LessonId> = None;
            for lesson in &topic.lessons {
                let open = match previous {
                    None => true,
                    Some(prev) => completed.contains(&(&topic.id, prev)),
                };
                if open {
                    lessons.insert(lesson.id);
                }
                previous = Some(lesson.id);
            }
            availability
                .unlocked_lessons
                .insert(topic.id.clone(), lessons);
        }
        availability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;
    use crate::model::curriculum::fixtures::sample_curriculum;
    use crate::time::fixed_now;
    use proptest::prelude::*;

    fn completed(topic: &str, lesson: u32) -> LessonProgress {
        let mut p = LessonProgress::new(
            UserId::new("u1").unwrap(),
            TopicId::new(topic).unwrap(),
            LessonId::new(lesson),
            fixed_now(),
        );
        p.record_attempt(80.0, true, fixed_now()).unwrap();
        p
    }

    fn topic(id: &str) -> TopicId {
        TopicId::new(id).unwrap()
    }

    #[test]
    fn new_user_sees_first_lesson_of_every_topic() {
        let curriculum = sample_curriculum();
        let availability = UnlockPolicy::available(&curriculum, &[]);
        for t in curriculum.topics() {
            assert!(availability.is_topic_unlocked(&t.id));
            let lessons: Vec<_> = availability.lessons(&t.id).unwrap().iter().copied().collect();
            assert_eq!(lessons, vec![LessonId::new(1)]);
        }
    }

    #[test]
    fn completing_a_lesson_opens_the_next() {
        let curriculum = sample_curriculum();
        let availability = UnlockPolicy::available(&curriculum, &[completed("basics", 1)]);
        assert!(availability.is_lesson_unlocked(&topic("basics"), LessonId::new(2)));
        assert!(!availability.is_lesson_unlocked(&topic("basics"), LessonId::new(3)));
        assert!(!availability.is_lesson_unlocked(&topic("assessment"), LessonId::new(2)));
    }

    #[test]
    fn attempted_but_failed_lesson_keeps_next_locked() {
        let curriculum = sample_curriculum();
        let mut failed = LessonProgress::new(
            UserId::new("u1").unwrap(),
            topic("basics"),
            LessonId::new(1),
            fixed_now(),
        );
        failed.record_attempt(20.0, false, fixed_now()).unwrap();

        let availability = UnlockPolicy::available(&curriculum, std::slice::from_ref(&failed));
        assert!(!availability.is_lesson_unlocked(&topic("basics"), LessonId::new(2)));
        assert_eq!(
            availability.status(&topic("basics"), LessonId::new(1), Some(&failed)),
            LessonStatus::InProgress
        );
        assert_eq!(
            availability.status(&topic("basics"), LessonId::new(2), None),
            LessonStatus::Locked
        );
    }

    #[test]
    fn evaluation_is_idempotent() {
        let curriculum = sample_curriculum();
        let rows = vec![completed("basics", 1), completed("basics", 2)];
        assert_eq!(
            UnlockPolicy::available(&curriculum, &rows),
            UnlockPolicy::available(&curriculum, &rows)
        );
    }

    proptest! {
        #[test]
        fn next_lesson_open_iff_previous_completed(mask in prop::collection::vec(any::<bool>(), 5)) {
            let curriculum = sample_curriculum();
            let positions: Vec<_> = curriculum.positions().collect();
            let rows: Vec<_> = positions
                .iter()
                .zip(&mask)
                .filter(|(_, done)| **done)
                .map(|(p, _)| completed(p.topic_id.as_str(), p.lesson_id.value()))
                .collect();
            let availability = UnlockPolicy::available(&curriculum, &rows);

            for t in curriculum.topics() {
                prop_assert!(availability.is_lesson_unlocked(&t.id, t.lessons[0].id));
                for pair in t.lessons.windows(2) {
                    let prev_done = rows
                        .iter()
                        .any(|r| r.topic_id() == &t.id && r.lesson_id() == pair[0].id);
                    prop_assert_eq!(availability.is_lesson_unlocked(&t.id, pair[1].id), prev_done);
                }
            }
        }
    }
}
