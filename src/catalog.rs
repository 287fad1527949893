use crate::models::Exercise;

/// Muscle groups offered when building a filter.
pub const MUSCLE_GROUPS: [&str; 12] = [
    "Chest",
    "Back",
    "Shoulders",
    "Biceps",
    "Triceps",
    "Forearms",
    "Quadriceps",
    "Hamstrings",
    "Glutes",
    "Calves",
    "Core",
    "Cardio",
];

const MAX_RESULTS: usize = 15;

const EXERCISES: &[(&str, &str)] = &[
    // Chest
    ("Flat Barbell Bench Press", "Chest, Triceps, Shoulders"),
    ("Flat Dumbbell Bench Press", "Chest, Triceps, Shoulders"),
    ("Incline Dumbbell Bench Press", "Chest, Triceps, Shoulders"),
    ("Incline Barbell Bench Press", "Chest, Shoulders, Triceps"),
    ("Push-Ups", "Chest, Triceps, Shoulders, Core"),
    ("Dumbbell Flyes", "Chest, Shoulders"),
    ("Machine Flyes", "Chest, Shoulders"),
    // Back
    ("Pull-Ups", "Back, Biceps"),
    ("Lat Pulldowns", "Back, Biceps"),
    ("Bent-Over Rows", "Back, Biceps, Shoulders"),
    ("Deadlift", "Back, Glutes, Hamstrings, Core"),
    ("T-Bar Rows", "Back, Biceps"),
    ("Face Pulls", "Back, Shoulders"),
    // Shoulders
    ("Overhead Press", "Shoulders, Triceps"),
    ("Lateral Raises", "Shoulders"),
    ("Front Raises", "Shoulders"),
    ("Upright Rows", "Shoulders, Traps"),
    ("Shrugs", "Traps, Shoulders"),
    ("Reverse Flyes", "Shoulders, Back"),
    // Arms
    ("Bicep Curls", "Biceps"),
    ("Hammer Curls", "Biceps, Forearms"),
    ("Preacher Curls", "Biceps"),
    ("Tricep Pushdowns", "Triceps"),
    ("Skull Crushers", "Triceps"),
    ("Dips", "Triceps, Chest, Shoulders"),
    // Legs
    ("Squats", "Quadriceps, Glutes, Hamstrings, Core"),
    ("Leg Press", "Quadriceps, Glutes, Hamstrings"),
    ("Lunges", "Quadriceps, Glutes, Hamstrings"),
    ("Leg Extensions", "Quadriceps"),
    ("Leg Curls", "Hamstrings"),
    ("Calf Raises", "Calves"),
    // Core
    ("Crunches", "Core"),
    ("Planks", "Core, Shoulders"),
    ("Russian Twists", "Core"),
    ("Leg Raises", "Core"),
    ("Mountain Climbers", "Core, Shoulders"),
    ("Ab Rollouts", "Core, Shoulders"),
    // Cardio
    ("Running", "Cardio, Quadriceps, Hamstrings, Calves"),
    ("Cycling", "Cardio, Quadriceps, Hamstrings, Calves"),
    ("Rowing", "Cardio, Back, Biceps, Shoulders, Core"),
    ("Jump Rope", "Cardio, Calves, Shoulders"),
    ("Burpees", "Cardio, Chest, Shoulders, Quadriceps, Core"),
];

const SAMPLE_WORKOUTS: &[(&str, &str)] = &[
    ("Upper Body", "Chest, back, and arms to focus upper body"),
    ("Lower Body", "Leg exercises to focus lower body"),
    ("Full Body", "Full body workout to build overall fitness"),
    ("Core", "Strengthen your midsection and improve stability"),
    ("Push Day", "All pushing exercises for chest, shoulders, and triceps"),
    ("Pull Day", "All pulling exercises for back and biceps"),
];

/// Built-in exercises, numbered from "1" in list order.
pub fn default_exercises() -> Vec<Exercise> {
    EXERCISES
        .iter()
        .enumerate()
        .map(|(i, (name, muscle_group))| Exercise::with_id((i + 1).to_string(), *name, *muscle_group))
        .collect()
}

/// (name, description) templates for new workouts.
pub fn sample_workouts() -> &'static [(&'static str, &'static str)] {
    SAMPLE_WORKOUTS
}

fn primary_group(exercise: &Exercise) -> &str {
    exercise.muscle_groups().next().unwrap_or_default()
}

/// Looks up built-in exercises.
///
/// `muscle_group` narrows the list first. Blank text then lists exercises
/// grouped by primary muscle group, groups in order of first appearance;
/// otherwise name or muscle label must contain the text. Case is ignored
/// throughout and at most 15 exercises come back.
pub fn search(text: &str, muscle_group: Option<&str>) -> Vec<Exercise> {
    let base: Vec<Exercise> = match muscle_group {
        Some(group) => default_exercises()
            .into_iter()
            .filter(|e| e.targets(group))
            .collect(),
        None => default_exercises(),
    };

    let text = text.trim();
    if text.is_empty() {
        let mut groups: Vec<(String, Vec<Exercise>)> = Vec::new();
        for exercise in base {
            let key = primary_group(&exercise).to_string();
            match groups.iter_mut().find(|(group, _)| *group == key) {
                Some((_, members)) => members.push(exercise),
                None => groups.push((key, vec![exercise])),
            }
        }
        return groups
            .into_iter()
            .flat_map(|(_, members)| members)
            .take(MAX_RESULTS)
            .collect();
    }

    let needle = text.to_lowercase();
    base.into_iter()
        .filter(|e| {
            e.name.to_lowercase().contains(&needle) || e.muscle_group.to_lowercase().contains(&needle)
        })
        .take(MAX_RESULTS)
        .collect()
}
