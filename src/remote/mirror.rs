use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::{Exercise, Workout};

use super::document::{encode, Document, DocumentStore};

const EXERCISES: &str = "exercises";
const WORKOUTS: &str = "workouts";

pub(crate) fn user_collection(user_id: &str, name: &str) -> String {
    format!("users/{}/{}", user_id, name)
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExerciseDoc {
    name: String,
    muscle_group: String,
}

impl ExerciseDoc {
    fn from_exercise(exercise: &Exercise) -> Self {
        Self {
            name: exercise.name.clone(),
            muscle_group: exercise.muscle_group.clone(),
        }
    }

    fn into_exercise(self, id: String) -> Exercise {
        Exercise {
            id,
            name: self.name,
            muscle_group: self.muscle_group,
        }
    }
}

/// Membership lives inside the workout document as a list of exercise ids.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WorkoutDoc {
    name: String,
    description: String,
    exercise_ids: Vec<String>,
}

fn decode_exercises(docs: Vec<Document>) -> Vec<Exercise> {
    docs.into_iter()
        .filter_map(|doc| match doc.decode::<ExerciseDoc>() {
            Ok(exercise) => Some(exercise.into_exercise(doc.id)),
            Err(e) => {
                tracing::warn!("Skipping malformed exercise document {}: {}", doc.id, e);
                None
            }
        })
        .collect()
}

/// Joins workout documents with the user's exercises. Ids that point at no
/// exercise document are dropped.
fn resolve_workouts(workout_docs: Vec<Document>, exercises: &[Exercise]) -> Vec<Workout> {
    workout_docs
        .into_iter()
        .filter_map(|doc| {
            let workout = match doc.decode::<WorkoutDoc>() {
                Ok(workout) => workout,
                Err(e) => {
                    tracing::warn!("Skipping malformed workout document {}: {}", doc.id, e);
                    return None;
                }
            };
            let members = exercises
                .iter()
                .filter(|e| workout.exercise_ids.contains(&e.id))
                .cloned()
                .collect();
            Some(Workout {
                id: doc.id,
                name: workout.name,
                description: workout.description,
                exercises: members,
            })
        })
        .collect()
}

/// Typed view of the cloud document store, one namespace per user.
#[derive(Clone)]
pub struct RemoteMirror {
    store: Arc<dyn DocumentStore>,
}

impl RemoteMirror {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // Exercise operations

    pub async fn list_exercises(&self, user_id: &str) -> Result<Vec<Exercise>> {
        let docs = self.store.list(&user_collection(user_id, EXERCISES)).await?;
        Ok(decode_exercises(docs))
    }

    pub async fn upsert_exercise(&self, user_id: &str, exercise: &Exercise) -> Result<()> {
        let fields = encode(&ExerciseDoc::from_exercise(exercise))?;
        self.store
            .set(&user_collection(user_id, EXERCISES), &exercise.id, fields)
            .await
    }

    pub async fn delete_exercise(&self, user_id: &str, exercise_id: &str) -> Result<()> {
        self.store
            .delete(&user_collection(user_id, EXERCISES), exercise_id)
            .await
    }

    pub fn watch_exercises(&self, user_id: &str) -> BoxStream<'static, Result<Vec<Exercise>>> {
        self.store
            .watch(&user_collection(user_id, EXERCISES))
            .map(|snapshot| snapshot.map(decode_exercises))
            .boxed()
    }

    // Workout operations

    pub async fn list_workouts(&self, user_id: &str) -> Result<Vec<Workout>> {
        let docs = self.store.list(&user_collection(user_id, WORKOUTS)).await?;
        self.resolve_snapshot(user_id, docs).await
    }

    /// Writes every embedded exercise, then the workout document.
    pub async fn insert_workout(&self, user_id: &str, workout: &Workout) -> Result<()> {
        for exercise in &workout.exercises {
            self.upsert_exercise(user_id, exercise).await?;
        }

        let doc = WorkoutDoc {
            name: workout.name.clone(),
            description: workout.description.clone(),
            exercise_ids: workout.exercise_ids(),
        };
        self.store
            .set(&user_collection(user_id, WORKOUTS), &workout.id, encode(&doc)?)
            .await
    }

    /// Rewrites name and description. Membership already stored remotely is
    /// kept; a new document takes the workout's own exercise list.
    pub async fn update_workout(&self, user_id: &str, workout: &Workout) -> Result<()> {
        let collection = user_collection(user_id, WORKOUTS);
        let exercise_ids = match self.store.get(&collection, &workout.id).await? {
            Some(existing) => existing.decode::<WorkoutDoc>()?.exercise_ids,
            None => workout.exercise_ids(),
        };

        let doc = WorkoutDoc {
            name: workout.name.clone(),
            description: workout.description.clone(),
            exercise_ids,
        };
        self.store.set(&collection, &workout.id, encode(&doc)?).await
    }

    pub async fn delete_workout(&self, user_id: &str, workout_id: &str) -> Result<()> {
        self.store
            .delete(&user_collection(user_id, WORKOUTS), workout_id)
            .await
    }

    /// Read-modify-write without a version check: a concurrent membership
    /// edit from elsewhere can be overwritten.
    pub async fn add_exercise_to_workout(
        &self,
        user_id: &str,
        workout_id: &str,
        exercise: &Exercise,
    ) -> Result<()> {
        self.upsert_exercise(user_id, exercise).await?;

        let collection = user_collection(user_id, WORKOUTS);
        let Some(doc) = self.store.get(&collection, workout_id).await? else {
            return Ok(());
        };
        let mut exercise_ids = doc.decode::<WorkoutDoc>()?.exercise_ids;
        if exercise_ids.contains(&exercise.id) {
            return Ok(());
        }
        exercise_ids.push(exercise.id.clone());

        self.store
            .update_field(&collection, workout_id, "exerciseIds", Value::from(exercise_ids))
            .await
    }

    pub async fn remove_exercise_from_workout(
        &self,
        user_id: &str,
        workout_id: &str,
        exercise_id: &str,
    ) -> Result<()> {
        let collection = user_collection(user_id, WORKOUTS);
        let Some(doc) = self.store.get(&collection, workout_id).await? else {
            return Ok(());
        };
        let exercise_ids: Vec<String> = doc
            .decode::<WorkoutDoc>()?
            .exercise_ids
            .into_iter()
            .filter(|id| id != exercise_id)
            .collect();

        self.store
            .update_field(&collection, workout_id, "exerciseIds", Value::from(exercise_ids))
            .await
    }

    /// Re-reads the exercise collection on every workout snapshot so that
    /// membership resolves against current exercise documents.
    pub fn watch_workouts(&self, user_id: &str) -> BoxStream<'static, Result<Vec<Workout>>> {
        let mirror = self.clone();
        let user_id = user_id.to_string();
        self.store
            .watch(&user_collection(&user_id, WORKOUTS))
            .then(move |snapshot| {
                let mirror = mirror.clone();
                let user_id = user_id.clone();
                async move {
                    match snapshot {
                        Ok(docs) => mirror.resolve_snapshot(&user_id, docs).await,
                        Err(e) => Err(e),
                    }
                }
            })
            .boxed()
    }

    async fn resolve_snapshot(&self, user_id: &str, docs: Vec<Document>) -> Result<Vec<Workout>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let exercises = self.list_exercises(user_id).await?;
        Ok(resolve_workouts(docs, &exercises))
    }
}
