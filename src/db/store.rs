use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::{params, OptionalExtension, Row};
use tokio::sync::watch;
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Exercise, Workout};

use super::schema;

/// SQLite cache of exercises, workouts and their membership, scoped by user.
///
/// Every committed write bumps a revision counter; the `watch_*` streams
/// re-run their query whenever it moves.
#[derive(Clone)]
pub struct LocalStore {
    conn: Connection,
    changes: Arc<watch::Sender<u64>>,
}

impl LocalStore {
    pub async fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            schema::migrate(conn)?;
            Ok(())
        })
        .await?;

        let (changes, _) = watch::channel(0);
        Ok(Self {
            conn,
            changes: Arc::new(changes),
        })
    }

    fn notify(&self) {
        self.changes.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    // Exercise operations

    pub async fn insert_exercise(&self, exercise: &Exercise, user_id: &str) -> Result<()> {
        let exercise = exercise.clone();
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO exercises (id, name, muscleGroup, userId) VALUES (?1, ?2, ?3, ?4)",
                    params![exercise.id, exercise.name, exercise.muscle_group, user_id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn update_exercise(&self, exercise: &Exercise, user_id: &str) -> Result<()> {
        let exercise = exercise.clone();
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE exercises SET name = ?2, muscleGroup = ?3, userId = ?4 WHERE id = ?1",
                    params![exercise.id, exercise.name, exercise.muscle_group, user_id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn delete_exercise(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM exercises WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>> {
        let id = id.to_string();
        let exercise = self
            .conn
            .call(move |conn| {
                let exercise = conn
                    .query_row(
                        "SELECT id, name, muscleGroup FROM exercises WHERE id = ?1",
                        params![id],
                        exercise_from_row,
                    )
                    .optional()?;
                Ok(exercise)
            })
            .await?;
        Ok(exercise)
    }

    pub async fn exercises_for_user(&self, user_id: &str) -> Result<Vec<Exercise>> {
        let user_id = user_id.to_string();
        let exercises = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, muscleGroup FROM exercises WHERE userId = ?1 ORDER BY name, id",
                )?;
                let exercises = stmt
                    .query_map(params![user_id], exercise_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(exercises)
            })
            .await?;
        Ok(exercises)
    }

    pub async fn all_exercises(&self) -> Result<Vec<Exercise>> {
        let exercises = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, muscleGroup FROM exercises ORDER BY name, id")?;
                let exercises = stmt
                    .query_map([], exercise_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(exercises)
            })
            .await?;
        Ok(exercises)
    }

    // Workout operations

    /// Writes the workout row only; membership goes through
    /// `insert_workout_exercise`.
    pub async fn insert_workout(&self, workout: &Workout, user_id: &str) -> Result<()> {
        let (id, name, description) = workout_columns(workout);
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO workouts (id, name, description, userId) VALUES (?1, ?2, ?3, ?4)",
                    params![id, name, description, user_id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn update_workout(&self, workout: &Workout, user_id: &str) -> Result<()> {
        let (id, name, description) = workout_columns(workout);
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE workouts SET name = ?2, description = ?3, userId = ?4 WHERE id = ?1",
                    params![id, name, description, user_id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn delete_workout(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM workouts WHERE id = ?1", params![id])?;
                conn.execute(
                    "DELETE FROM workout_exercise_crossref WHERE workoutId = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn get_workout(&self, id: &str) -> Result<Option<Workout>> {
        let id = id.to_string();
        let workout = self
            .conn
            .call(move |conn| {
                let workout = conn
                    .query_row(
                        "SELECT id, name, description FROM workouts WHERE id = ?1",
                        params![id],
                        workout_from_row,
                    )
                    .optional()?;

                let Some(mut workout) = workout else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    r#"SELECT e.id, e.name, e.muscleGroup
                       FROM workout_exercise_crossref c
                       JOIN workouts w ON w.id = c.workoutId
                       JOIN exercises e ON e.id = c.exerciseId AND e.userId = w.userId
                       WHERE c.workoutId = ?1
                       ORDER BY e.name, e.id"#,
                )?;
                workout.exercises = stmt
                    .query_map(params![id], exercise_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Some(workout))
            })
            .await?;
        Ok(workout)
    }

    /// Workouts of one user with their exercises. Joined exercises owned by a
    /// different user are dropped here rather than rejected on write.
    pub async fn workouts_for_user(&self, user_id: &str) -> Result<Vec<Workout>> {
        let user_id = user_id.to_string();
        let workouts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, description FROM workouts WHERE userId = ?1 ORDER BY name, id",
                )?;
                let mut workouts = stmt
                    .query_map(params![user_id], workout_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(
                    r#"SELECT c.workoutId, e.id, e.name, e.muscleGroup
                       FROM workout_exercise_crossref c
                       JOIN workouts w ON w.id = c.workoutId
                       JOIN exercises e ON e.id = c.exerciseId AND e.userId = w.userId
                       WHERE w.userId = ?1
                       ORDER BY e.name, e.id"#,
                )?;
                let mut members: HashMap<String, Vec<Exercise>> = HashMap::new();
                let rows = stmt.query_map(params![user_id], |row| {
                    let workout_id: String = row.get(0)?;
                    let exercise = Exercise {
                        id: row.get(1)?,
                        name: row.get(2)?,
                        muscle_group: row.get(3)?,
                    };
                    Ok((workout_id, exercise))
                })?;
                for row in rows {
                    let (workout_id, exercise) = row?;
                    members.entry(workout_id).or_default().push(exercise);
                }

                for workout in &mut workouts {
                    workout.exercises = members.remove(&workout.id).unwrap_or_default();
                }
                Ok(workouts)
            })
            .await?;
        Ok(workouts)
    }

    // Membership operations

    pub async fn insert_workout_exercise(&self, workout_id: &str, exercise_id: &str) -> Result<()> {
        let workout_id = workout_id.to_string();
        let exercise_id = exercise_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO workout_exercise_crossref (workoutId, exerciseId) VALUES (?1, ?2)",
                    params![workout_id, exercise_id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn delete_workout_exercise(&self, workout_id: &str, exercise_id: &str) -> Result<()> {
        let workout_id = workout_id.to_string();
        let exercise_id = exercise_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM workout_exercise_crossref WHERE workoutId = ?1 AND exerciseId = ?2",
                    params![workout_id, exercise_id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn delete_workout_exercises(&self, workout_id: &str) -> Result<()> {
        let workout_id = workout_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM workout_exercise_crossref WHERE workoutId = ?1",
                    params![workout_id],
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    /// Raw join rows for a workout, including ones whose exercise is gone.
    pub async fn exercise_ids_for_workout(&self, workout_id: &str) -> Result<Vec<String>> {
        let workout_id = workout_id.to_string();
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT exerciseId FROM workout_exercise_crossref WHERE workoutId = ?1 ORDER BY exerciseId",
                )?;
                let ids = stmt
                    .query_map(params![workout_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    // Bulk operations

    pub async fn delete_user_data(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                // Join rows first: they are located through the user's workouts
                conn.execute(
                    "DELETE FROM workout_exercise_crossref WHERE workoutId IN (SELECT id FROM workouts WHERE userId = ?1)",
                    params![user_id],
                )?;
                conn.execute("DELETE FROM exercises WHERE userId = ?1", params![user_id])?;
                conn.execute("DELETE FROM workouts WHERE userId = ?1", params![user_id])?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    r#"DELETE FROM workout_exercise_crossref;
                       DELETE FROM exercises;
                       DELETE FROM workouts;"#,
                )?;
                Ok(())
            })
            .await?;
        self.notify();
        Ok(())
    }

    // Live queries

    pub fn watch_exercises(&self, user_id: &str) -> BoxStream<'static, Result<Vec<Exercise>>> {
        let user_id = user_id.to_string();
        self.watch_query(move |store| {
            let user_id = user_id.clone();
            async move { store.exercises_for_user(&user_id).await }
        })
    }

    pub fn watch_workouts(&self, user_id: &str) -> BoxStream<'static, Result<Vec<Workout>>> {
        let user_id = user_id.to_string();
        self.watch_query(move |store| {
            let user_id = user_id.clone();
            async move { store.workouts_for_user(&user_id).await }
        })
    }

    /// Emits the query result now and again after every later write.
    /// Writes that land while a query runs are coalesced into one re-run.
    fn watch_query<T, F, Fut>(&self, query: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        F: Fn(LocalStore) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let changes = self.changes.subscribe();
        stream::unfold(
            (self.clone(), changes, query, true),
            |(store, mut changes, query, first)| async move {
                if !first && changes.changed().await.is_err() {
                    return None;
                }
                changes.borrow_and_update();
                let item = query(store.clone()).await;
                Some((item, (store, changes, query, false)))
            },
        )
        .boxed()
    }
}

fn workout_columns(workout: &Workout) -> (String, String, String) {
    (
        workout.id.clone(),
        workout.name.clone(),
        workout.description.clone(),
    )
}

fn exercise_from_row(row: &Row) -> rusqlite::Result<Exercise> {
    Ok(Exercise {
        id: row.get(0)?,
        name: row.get(1)?,
        muscle_group: row.get(2)?,
    })
}

fn workout_from_row(row: &Row) -> rusqlite::Result<Workout> {
    Ok(Workout {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        exercises: Vec::new(),
    })
}
