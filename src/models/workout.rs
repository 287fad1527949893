use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Exercise;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workout {
    pub id: String,
    pub name: String,
    pub description: String,
    pub exercises: Vec<Exercise>,
}

impl Workout {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, description)
    }

    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            exercises: Vec::new(),
        }
    }

    pub fn with_exercises(mut self, exercises: Vec<Exercise>) -> Self {
        self.exercises = exercises;
        self
    }

    pub fn exercise_ids(&self) -> Vec<String> {
        self.exercises.iter().map(|e| e.id.clone()).collect()
    }

    /// True when every requested group is hit by at least one exercise.
    pub fn matches_muscle_groups(&self, groups: &[String]) -> bool {
        groups
            .iter()
            .all(|group| self.exercises.iter().any(|e| e.targets(group)))
    }
}
