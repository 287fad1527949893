use futures::stream::BoxStream;

use crate::auth::{AuthState, UserScope};
use crate::db::LocalStore;
use crate::error::Result;
use crate::models::{Exercise, Workout};
use crate::remote::RemoteMirror;

/// The remote namespace to mirror into, if the scope has one.
fn mirror_target(scope: &UserScope) -> Option<&str> {
    scope.is_authenticated().then(|| scope.user_id())
}

/// Fans every change out to the local cache first and then, for a signed-in
/// user, to the cloud mirror.
///
/// Mirror failures on single writes are logged and dropped: the local write
/// stands and the two sides stay apart until the next full resync.
#[derive(Clone)]
pub struct Synchronizer {
    local: LocalStore,
    remote: RemoteMirror,
    auth: AuthState,
}

impl Synchronizer {
    pub fn new(local: LocalStore, remote: RemoteMirror, auth: AuthState) -> Self {
        Self {
            local,
            remote,
            auth,
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    // Exercise operations

    pub async fn insert_exercise(&self, exercise: &Exercise) -> Result<()> {
        self.insert_exercise_as(&self.auth.current(), exercise).await
    }

    /// Each public write reads the scope once and passes it down, so the
    /// local row and its mirror always land under the same user.
    async fn insert_exercise_as(&self, scope: &UserScope, exercise: &Exercise) -> Result<()> {
        self.local.insert_exercise(exercise, scope.user_id()).await?;

        if let Some(user_id) = mirror_target(scope) {
            if let Err(e) = self.remote.upsert_exercise(user_id, exercise).await {
                tracing::error!("Error syncing exercise to remote: {}", e);
            }
        }
        Ok(())
    }

    pub async fn update_exercise(&self, exercise: &Exercise) -> Result<()> {
        let scope = self.auth.current();
        self.local.update_exercise(exercise, scope.user_id()).await?;

        if let Some(user_id) = mirror_target(&scope) {
            if let Err(e) = self.remote.upsert_exercise(user_id, exercise).await {
                tracing::error!("Error updating exercise in remote: {}", e);
            }
        }
        Ok(())
    }

    pub async fn delete_exercise(&self, exercise: &Exercise) -> Result<()> {
        let scope = self.auth.current();
        self.local.delete_exercise(&exercise.id).await?;

        if let Some(user_id) = mirror_target(&scope) {
            if let Err(e) = self.remote.delete_exercise(user_id, &exercise.id).await {
                tracing::error!("Error deleting exercise from remote: {}", e);
            }
        }
        Ok(())
    }

    pub async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>> {
        self.local.get_exercise(id).await
    }

    pub fn watch_exercises(&self, scope: &UserScope) -> BoxStream<'static, Result<Vec<Exercise>>> {
        self.local.watch_exercises(scope.user_id())
    }

    // Workout operations

    pub async fn insert_workout(&self, workout: &Workout) -> Result<()> {
        let scope = self.auth.current();
        self.local.insert_workout(workout, scope.user_id()).await?;

        for exercise in &workout.exercises {
            self.insert_exercise_as(&scope, exercise).await?;
            self.local
                .insert_workout_exercise(&workout.id, &exercise.id)
                .await?;
        }

        if let Some(user_id) = mirror_target(&scope) {
            if let Err(e) = self.remote.insert_workout(user_id, workout).await {
                tracing::error!("Error syncing workout to remote: {}", e);
            }
        }
        Ok(())
    }

    /// Name and description only; membership has its own operations.
    pub async fn update_workout(&self, workout: &Workout) -> Result<()> {
        let scope = self.auth.current();
        self.local.update_workout(workout, scope.user_id()).await?;

        if let Some(user_id) = mirror_target(&scope) {
            if let Err(e) = self.remote.update_workout(user_id, workout).await {
                tracing::error!("Error updating workout in remote: {}", e);
            }
        }
        Ok(())
    }

    pub async fn delete_workout(&self, workout: &Workout) -> Result<()> {
        let scope = self.auth.current();
        self.local.delete_workout(&workout.id).await?;

        if let Some(user_id) = mirror_target(&scope) {
            if let Err(e) = self.remote.delete_workout(user_id, &workout.id).await {
                tracing::error!("Error deleting workout from remote: {}", e);
            }
        }
        Ok(())
    }

    pub async fn get_workout(&self, id: &str) -> Result<Option<Workout>> {
        self.local.get_workout(id).await
    }

    pub fn watch_workouts(&self, scope: &UserScope) -> BoxStream<'static, Result<Vec<Workout>>> {
        self.local.watch_workouts(scope.user_id())
    }

    // Membership operations

    pub async fn add_exercise_to_workout(&self, workout_id: &str, exercise: &Exercise) -> Result<()> {
        let scope = self.auth.current();
        self.insert_exercise_as(&scope, exercise).await?;
        self.local
            .insert_workout_exercise(workout_id, &exercise.id)
            .await?;

        if let Some(user_id) = mirror_target(&scope) {
            if let Err(e) = self
                .remote
                .add_exercise_to_workout(user_id, workout_id, exercise)
                .await
            {
                tracing::error!("Error adding exercise to workout in remote: {}", e);
            }
        }
        Ok(())
    }

    pub async fn remove_exercise_from_workout(&self, workout_id: &str, exercise_id: &str) -> Result<()> {
        let scope = self.auth.current();
        self.local
            .delete_workout_exercise(workout_id, exercise_id)
            .await?;

        if let Some(user_id) = mirror_target(&scope) {
            if let Err(e) = self
                .remote
                .remove_exercise_from_workout(user_id, workout_id, exercise_id)
                .await
            {
                tracing::error!("Error removing exercise from workout in remote: {}", e);
            }
        }
        Ok(())
    }

    // Full resync

    /// Replaces the signed-in user's local rows with the remote contents.
    /// Unlike single writes, failures here are returned to the caller.
    pub async fn sync_from_remote(&self) -> Result<()> {
        let scope = self.auth.current();
        let Some(user_id) = mirror_target(&scope) else {
            tracing::debug!("No user logged in, skipping sync");
            return Ok(());
        };

        tracing::debug!("Syncing data from remote for user: {}", user_id);
        match self.replace_local_with_remote(user_id).await {
            Ok((exercises, workouts)) => {
                tracing::info!(
                    "Data sync completed: {} exercises, {} workouts",
                    exercises,
                    workouts
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Error syncing data from remote: {}", e);
                Err(e)
            }
        }
    }

    async fn replace_local_with_remote(&self, user_id: &str) -> Result<(usize, usize)> {
        self.local.delete_user_data(user_id).await?;

        let exercises = self.remote.list_exercises(user_id).await?;
        for exercise in &exercises {
            self.local.insert_exercise(exercise, user_id).await?;
        }

        let workouts = self.remote.list_workouts(user_id).await?;
        for workout in &workouts {
            self.local.insert_workout(workout, user_id).await?;
            for exercise in &workout.exercises {
                self.local.insert_exercise(exercise, user_id).await?;
                self.local
                    .insert_workout_exercise(&workout.id, &exercise.id)
                    .await?;
            }
        }

        Ok((exercises.len(), workouts.len()))
    }

    // Clearing

    pub async fn clear_user_data(&self, user_id: &str) -> Result<()> {
        tracing::debug!("Clearing local data for user: {}", user_id);
        match self.local.delete_user_data(user_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Error clearing user data: {}", e);
                Err(e)
            }
        }
    }

    /// A user scope drops that user's rows; the guest scope drops everything.
    pub async fn clear_local_data(&self, scope: &UserScope) -> Result<()> {
        match scope {
            UserScope::User(user_id) => self.clear_user_data(user_id).await,
            UserScope::Guest => {
                tracing::debug!("Clearing all local data");
                match self.local.delete_all().await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        tracing::error!("Error clearing all local data: {}", e);
                        Err(e)
                    }
                }
            }
        }
    }
}
