use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Average score at or above which a learner receives advanced questions.
pub const ADVANCED_MIN_AVERAGE: f64 = 90.0;

/// Average score below which a learner receives beginner questions.
pub const BEGINNER_MAX_AVERAGE: f64 = 65.0;

/// Failed attempts on the same lesson after which difficulty steps down once.
pub const STRUGGLE_ATTEMPTS: u32 = 3;

/// Difficulty tag attached to questions and used to parameterize generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    #[must_use]
    fn easier(self) -> Self {
        match self {
            Difficulty::Advanced => Difficulty::Intermediate,
            Difficulty::Intermediate | Difficulty::Beginner => Difficulty::Beginner,
        }
    }

    /// Pick a difficulty from the learner's average best score and how many
    /// times they already attempted the lesson without completing it.
    ///
    /// A learner without any completed lesson has no average and starts at
    /// intermediate.
    #[must_use]
    pub fn for_learner(average_score: Option<f64>, failed_attempts_on_lesson: u32) -> Self {
        let base = match average_score {
            Some(avg) if avg >= ADVANCED_MIN_AVERAGE => Difficulty::Advanced,
            Some(avg) if avg < BEGINNER_MAX_AVERAGE => Difficulty::Beginner,
            _ => Difficulty::Intermediate,
        };
        if failed_attempts_on_lesson >= STRUGGLE_ATTEMPTS {
            base.easier()
        } else {
            base
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" | "medium" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}
