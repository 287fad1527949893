use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    /// Comma-separated muscle group tags, e.g. "Chest, Triceps".
    pub muscle_group: String,
}

impl Exercise {
    pub fn new(name: impl Into<String>, muscle_group: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, muscle_group)
    }

    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        muscle_group: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            muscle_group: muscle_group.into(),
        }
    }

    pub fn muscle_groups(&self) -> impl Iterator<Item = &str> {
        self.muscle_group
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Case-insensitive substring match against the whole label.
    pub fn targets(&self, muscle_group: &str) -> bool {
        self.muscle_group
            .to_lowercase()
            .contains(&muscle_group.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_tags() {
        let exercise = Exercise::with_id("1", "Bench Press", "Chest, Triceps,, Shoulders ");
        let groups: Vec<_> = exercise.muscle_groups().collect();
        assert_eq!(groups, vec!["Chest", "Triceps", "Shoulders"]);
    }

    #[test]
    fn targets_ignores_case() {
        let exercise = Exercise::with_id("1", "Bench Press", "Chest, Triceps");
        assert!(exercise.targets("chest"));
        assert!(exercise.targets("TRICEP"));
        assert!(!exercise.targets("Quadriceps"));
    }

    #[test]
    fn new_generates_distinct_ids() {
        let a = Exercise::new("Squats", "Quadriceps");
        let b = Exercise::new("Squats", "Quadriceps");
        assert_ne!(a.id, b.id);
    }
}
