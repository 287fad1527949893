use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::auth::{AuthState, UserScope};
use crate::error::Result;
use crate::models::{Exercise, Workout, WorkoutImage};
use crate::remote::ImageStore;
use crate::sync::Synchronizer;

/// Keeps the workouts that hit every requested muscle group. An empty
/// group list keeps everything.
pub fn filter_workouts(workouts: &[Workout], muscle_groups: &[String]) -> Vec<Workout> {
    workouts
        .iter()
        .filter(|workout| workout.matches_muscle_groups(muscle_groups))
        .cloned()
        .collect()
}

struct State {
    exercises: watch::Sender<Vec<Exercise>>,
    workouts: watch::Sender<Vec<Workout>>,
    filter_muscle_groups: watch::Sender<Vec<String>>,
    filtered_workouts: watch::Sender<Vec<Workout>>,
    workout_images: watch::Sender<HashMap<String, Vec<WorkoutImage>>>,
    uploading_image: watch::Sender<bool>,
}

impl State {
    fn new() -> Self {
        Self {
            exercises: watch::channel(Vec::new()).0,
            workouts: watch::channel(Vec::new()).0,
            filter_muscle_groups: watch::channel(Vec::new()).0,
            filtered_workouts: watch::channel(Vec::new()).0,
            workout_images: watch::channel(HashMap::new()).0,
            uploading_image: watch::channel(false).0,
        }
    }

    fn refilter(&self) {
        let filtered = filter_workouts(
            &self.workouts.borrow(),
            &self.filter_muscle_groups.borrow(),
        );
        self.filtered_workouts.send_replace(filtered);
    }
}

/// Observable gym state plus the intents that change it.
///
/// A background task follows the signed-in scope and republishes that
/// scope's exercises and workouts; image galleries are loaded per workout
/// on demand. Dropping the tracker stops every task it started.
pub struct GymTracker {
    sync: Synchronizer,
    images: ImageStore,
    state: Arc<State>,
    image_jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    follower: JoinHandle<()>,
}

impl GymTracker {
    /// Must be called from within a tokio runtime.
    pub fn new(sync: Synchronizer, images: ImageStore) -> Self {
        let state = Arc::new(State::new());
        let follower = tokio::spawn(follow_scope(
            sync.clone(),
            sync.auth().subscribe(),
            state.filter_muscle_groups.subscribe(),
            state.clone(),
        ));

        Self {
            sync,
            images,
            state,
            image_jobs: Mutex::new(HashMap::new()),
            follower,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    fn auth(&self) -> &AuthState {
        self.sync.auth()
    }

    // Observable state

    pub fn exercises(&self) -> watch::Receiver<Vec<Exercise>> {
        self.state.exercises.subscribe()
    }

    pub fn workouts(&self) -> watch::Receiver<Vec<Workout>> {
        self.state.workouts.subscribe()
    }

    pub fn filter_muscle_groups(&self) -> watch::Receiver<Vec<String>> {
        self.state.filter_muscle_groups.subscribe()
    }

    pub fn filtered_workouts(&self) -> watch::Receiver<Vec<Workout>> {
        self.state.filtered_workouts.subscribe()
    }

    pub fn workout_images(&self) -> watch::Receiver<HashMap<String, Vec<WorkoutImage>>> {
        self.state.workout_images.subscribe()
    }

    pub fn uploading_image(&self) -> watch::Receiver<bool> {
        self.state.uploading_image.subscribe()
    }

    // Filters

    /// The background task recomputes `filtered_workouts`; it is the only
    /// writer of that list.
    pub fn update_filter_muscle_groups(&self, muscle_groups: Vec<String>) {
        self.state.filter_muscle_groups.send_replace(muscle_groups);
    }

    pub fn clear_filters(&self) {
        self.update_filter_muscle_groups(Vec::new());
    }

    // Exercises and workouts

    pub async fn add_exercise(&self, name: &str, muscle_group: &str) -> Result<Option<Exercise>> {
        if name.trim().is_empty() {
            return Ok(None);
        }
        let exercise = Exercise::new(name, muscle_group);
        self.sync.insert_exercise(&exercise).await?;
        Ok(Some(exercise))
    }

    pub async fn add_workout(&self, name: &str, description: &str) -> Result<Option<Workout>> {
        if name.trim().is_empty() {
            return Ok(None);
        }
        let workout = Workout::new(name, description);
        self.sync.insert_workout(&workout).await?;
        Ok(Some(workout))
    }

    pub async fn update_workout(&self, workout_id: &str, name: &str, description: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Ok(());
        }
        let Some(mut workout) = self.sync.get_workout(workout_id).await? else {
            tracing::debug!("Ignoring update for unknown workout: {}", workout_id);
            return Ok(());
        };

        workout.name = name.to_string();
        workout.description = description.to_string();
        self.sync.update_workout(&workout).await
    }

    /// Removes the workout, every image attached to it and its gallery
    /// subscription.
    pub async fn delete_workout(&self, workout_id: &str) -> Result<()> {
        if let Some(workout) = self.sync.get_workout(workout_id).await? {
            self.sync.delete_workout(&workout).await?;
        }

        let scope = self.auth().current();
        if let Err(e) = self
            .images
            .delete_all_workout_images(scope.user_id(), workout_id)
            .await
        {
            tracing::error!("Error deleting images of workout {}: {}", workout_id, e);
        }

        if let Some(job) = self.image_jobs.lock().await.remove(workout_id) {
            job.abort();
        }
        self.state.workout_images.send_modify(|images| {
            images.remove(workout_id);
        });

        tracing::debug!("Deleted workout and its images: {}", workout_id);
        Ok(())
    }

    pub async fn add_exercise_to_workout(
        &self,
        workout_id: &str,
        name: &str,
        muscle_group: &str,
    ) -> Result<Option<Exercise>> {
        if name.trim().is_empty() {
            return Ok(None);
        }
        let exercise = Exercise::new(name, muscle_group);
        self.sync.add_exercise_to_workout(workout_id, &exercise).await?;
        Ok(Some(exercise))
    }

    /// Edits the exercise in place. The workout id is not needed to find it;
    /// the same exercise changes in every workout that uses it.
    pub async fn update_workout_exercise(
        &self,
        _workout_id: &str,
        exercise_id: &str,
        name: &str,
        muscle_group: &str,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Ok(());
        }
        let exercise = Exercise::with_id(exercise_id, name, muscle_group);
        self.sync.update_exercise(&exercise).await
    }

    pub async fn remove_exercise_from_workout(&self, workout_id: &str, exercise_id: &str) -> Result<()> {
        self.sync
            .remove_exercise_from_workout(workout_id, exercise_id)
            .await
    }

    // Images

    pub async fn upload_workout_image(&self, workout_id: &str, bytes: Vec<u8>) -> Option<WorkoutImage> {
        tracing::debug!("Starting image upload for workout: {}", workout_id);
        self.state.uploading_image.send_replace(true);

        let scope = self.auth().current();
        let uploaded = self
            .images
            .upload_workout_image(scope.user_id(), workout_id, bytes)
            .await;

        self.state.uploading_image.send_replace(false);
        match uploaded {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::error!("Error uploading image to workout {}: {}", workout_id, e);
                None
            }
        }
    }

    /// Starts the gallery subscription for a workout. A second call for the
    /// same workout is a no-op.
    pub async fn load_workout_images(&self, workout_id: &str) {
        let mut jobs = self.image_jobs.lock().await;
        if jobs.contains_key(workout_id) {
            tracing::debug!("Image flow already active for workout: {}", workout_id);
            return;
        }

        tracing::debug!("Loading images for workout: {}", workout_id);
        let scope = self.auth().current();
        let gallery = self.images.watch_workout_images(scope.user_id(), workout_id);
        let job = tokio::spawn(follow_gallery(
            workout_id.to_string(),
            gallery,
            self.state.clone(),
        ));
        jobs.insert(workout_id.to_string(), job);
    }

    pub async fn delete_workout_image(&self, image: &WorkoutImage) {
        let scope = self.auth().current();
        if let Err(e) = self
            .images
            .delete_workout_image(scope.user_id(), image)
            .await
        {
            tracing::error!("Error deleting image {}: {}", image.id, e);
        }
    }

    async fn clear_image_flows(&self) {
        for (_, job) in self.image_jobs.lock().await.drain() {
            job.abort();
        }
        self.state.workout_images.send_replace(HashMap::new());
    }

    // Auth reactions

    pub async fn sign_in(&self, user_id: &str) {
        let scope = UserScope::from_user_id(Some(user_id));
        self.auth().set(scope);
        if let Err(e) = self.sync.sync_from_remote().await {
            tracing::error!("Sign-in sync failed: {}", e);
        }
    }

    /// Switches to the guest scope and clears what the previous scope left
    /// in the local cache.
    pub async fn sign_out(&self) {
        let previous = self.auth().set(UserScope::Guest);
        self.clear_image_flows().await;
        if let Err(e) = self.sync.clear_local_data(&previous).await {
            tracing::error!("Error clearing local data on sign-out: {}", e);
        }
    }
}

impl Drop for GymTracker {
    fn drop(&mut self) {
        self.follower.abort();
        for (_, job) in self.image_jobs.get_mut().drain() {
            job.abort();
        }
    }
}

async fn follow_scope(
    sync: Synchronizer,
    mut scope_rx: watch::Receiver<UserScope>,
    mut filter_rx: watch::Receiver<Vec<String>>,
    state: Arc<State>,
) {
    loop {
        let scope = scope_rx.borrow_and_update().clone();
        let mut exercises = sync.watch_exercises(&scope);
        let mut workouts = sync.watch_workouts(&scope);

        loop {
            tokio::select! {
                changed = scope_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                changed = filter_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    state.refilter();
                }
                Some(next) = exercises.next() => match next {
                    Ok(list) => {
                        tracing::debug!("Exercises updated: {} items", list.len());
                        state.exercises.send_replace(list);
                    }
                    Err(e) => tracing::error!("Error reading exercises: {}", e),
                },
                Some(next) = workouts.next() => match next {
                    Ok(list) => {
                        tracing::debug!("Workouts updated: {} items", list.len());
                        state.workouts.send_replace(list);
                        state.refilter();
                    }
                    Err(e) => tracing::error!("Error reading workouts: {}", e),
                },
            }
        }
    }
}

async fn follow_gallery(
    workout_id: String,
    mut gallery: futures::stream::BoxStream<'static, Result<Vec<WorkoutImage>>>,
    state: Arc<State>,
) {
    while let Some(next) = gallery.next().await {
        match next {
            Ok(images) => {
                tracing::debug!("Received {} images for workout {}", images.len(), workout_id);
                state.workout_images.send_modify(|map| {
                    map.insert(workout_id.clone(), images);
                });
            }
            Err(e) => {
                tracing::error!("Error loading workout images for {}: {}", workout_id, e);
                state.workout_images.send_modify(|map| {
                    map.insert(workout_id.clone(), Vec::new());
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStore;
    use crate::remote::{DocumentStore, MemoryBlobStore, MemoryDocumentStore, RemoteMirror};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Fixture {
        tracker: GymTracker,
        documents: MemoryDocumentStore,
        blobs: MemoryBlobStore,
    }

    async fn fixture() -> Fixture {
        let documents = MemoryDocumentStore::new();
        let blobs = MemoryBlobStore::new();
        let local = LocalStore::open_in_memory().await.unwrap();
        let remote = RemoteMirror::new(Arc::new(documents.clone()));
        let sync = Synchronizer::new(local, remote, AuthState::default());
        let images = ImageStore::new(Arc::new(documents.clone()), Arc::new(blobs.clone()));
        Fixture {
            tracker: GymTracker::new(sync, images),
            documents,
            blobs,
        }
    }

    async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, condition: F)
    where
        F: FnMut(&T) -> bool,
    {
        timeout(Duration::from_secs(2), rx.wait_for(condition))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    fn push_day() -> Workout {
        Workout::with_id("1", "Push Day", "")
            .with_exercises(vec![Exercise::with_id("1", "Bench Press", "Chest, Triceps")])
    }

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn filter_is_conjunction_of_substring_matches() {
        let leg_day = Workout::with_id("2", "Leg Day", "")
            .with_exercises(vec![Exercise::with_id("2", "Squats", "Quadriceps")]);
        let workouts = vec![push_day(), leg_day.clone()];

        assert_eq!(filter_workouts(&workouts, &groups(&["Quadriceps"])), vec![leg_day]);
        assert_eq!(filter_workouts(&workouts, &groups(&["chest"])), vec![push_day()]);
        assert_eq!(filter_workouts(&workouts, &groups(&["Chest", "Triceps"])), vec![push_day()]);
        assert!(filter_workouts(&workouts, &groups(&["Chest", "Quadriceps"])).is_empty());
        assert_eq!(filter_workouts(&workouts, &[]), workouts);
    }

    #[tokio::test]
    async fn filtered_workouts_follow_filter_and_data() {
        let f = fixture().await;
        let sync = f.tracker.synchronizer();
        sync.insert_exercise(&Exercise::with_id("2", "Squats", "Quadriceps"))
            .await
            .unwrap();
        sync.insert_workout(&push_day()).await.unwrap();

        let mut filtered = f.tracker.filtered_workouts();
        wait_until(&mut filtered, |w| *w == vec![push_day()]).await;

        f.tracker.update_filter_muscle_groups(groups(&["Quadriceps"]));
        wait_until(&mut filtered, |w| w.is_empty()).await;

        f.tracker.update_filter_muscle_groups(groups(&["Chest"]));
        wait_until(&mut filtered, |w| *w == vec![push_day()]).await;

        f.tracker.update_filter_muscle_groups(groups(&["Quadriceps"]));
        f.tracker.clear_filters();
        assert!(f.tracker.filter_muscle_groups().borrow().is_empty());
        wait_until(&mut filtered, |w| *w == vec![push_day()]).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn filtered_list_settles_on_latest_filter_and_data() {
        let f = fixture().await;
        let sync = f.tracker.synchronizer();

        for i in 0..10 {
            let (group, other) = if i % 2 == 0 {
                ("Chest", "Quadriceps")
            } else {
                ("Quadriceps", "Chest")
            };
            let workout = Workout::with_id(format!("w{}", i), format!("Workout {}", i), "")
                .with_exercises(vec![Exercise::with_id(format!("e{}", i), "Move", group)]);
            sync.insert_workout(&workout).await.unwrap();
            f.tracker.update_filter_muscle_groups(groups(&[other]));
        }
        f.tracker.update_filter_muscle_groups(groups(&["Quadriceps"]));

        let mut workouts = f.tracker.workouts();
        wait_until(&mut workouts, |list| {
            list.len() == 10 && list.iter().all(|w| w.exercises.len() == 1)
        })
        .await;

        let mut filtered = f.tracker.filtered_workouts();
        wait_until(&mut filtered, |list| {
            list.len() == 5 && list.iter().all(|w| w.exercises[0].muscle_group == "Quadriceps")
        })
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let expected = filter_workouts(&f.tracker.workouts().borrow(), &groups(&["Quadriceps"]));
        assert_eq!(*f.tracker.filtered_workouts().borrow(), expected);
    }

    #[tokio::test]
    async fn blank_names_are_ignored() {
        let f = fixture().await;
        assert!(f.tracker.add_exercise("  ", "Chest").await.unwrap().is_none());
        assert!(f.tracker.add_workout("", "desc").await.unwrap().is_none());
        assert!(f
            .tracker
            .add_exercise_to_workout("w1", " ", "Chest")
            .await
            .unwrap()
            .is_none());
        assert!(f.tracker.synchronizer().local().all_exercises().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn workout_intents_reach_published_state() {
        let f = fixture().await;
        let workout = f.tracker.add_workout("Push Day", "Upper body").await.unwrap().unwrap();
        let bench = f
            .tracker
            .add_exercise_to_workout(&workout.id, "Bench Press", "Chest")
            .await
            .unwrap()
            .unwrap();
        f.tracker
            .update_workout(&workout.id, "Push Day A", "Heavy")
            .await
            .unwrap();
        f.tracker
            .update_workout_exercise(&workout.id, &bench.id, "Incline Bench", "Chest, Shoulders")
            .await
            .unwrap();

        let mut workouts = f.tracker.workouts();
        wait_until(&mut workouts, |list| {
            list.len() == 1
                && list[0].name == "Push Day A"
                && list[0].exercises.len() == 1
                && list[0].exercises[0].name == "Incline Bench"
        })
        .await;

        let mut exercises = f.tracker.exercises();
        wait_until(&mut exercises, |list| list.len() == 1).await;

        f.tracker
            .remove_exercise_from_workout(&workout.id, &bench.id)
            .await
            .unwrap();
        wait_until(&mut workouts, |list| list[0].exercises.is_empty()).await;
    }

    #[tokio::test]
    async fn update_of_unknown_workout_is_ignored() {
        let f = fixture().await;
        tokio_test::assert_ok!(f.tracker.update_workout("missing", "Name", "").await);
        assert!(f.tracker.synchronizer().get_workout("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_out_as_guest_clears_everything() {
        let f = fixture().await;
        f.tracker.add_exercise("Plank", "Core").await.unwrap();
        f.tracker.add_workout("Core Day", "").await.unwrap();

        let mut exercises = f.tracker.exercises();
        let mut workouts = f.tracker.workouts();
        wait_until(&mut exercises, |list| list.len() == 1).await;
        wait_until(&mut workouts, |list| list.len() == 1).await;

        f.tracker.sign_out().await;

        wait_until(&mut exercises, |list| list.is_empty()).await;
        wait_until(&mut workouts, |list| list.is_empty()).await;
        assert!(f.tracker.synchronizer().local().all_exercises().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sign_in_switches_scope_and_resyncs() {
        let f = fixture().await;
        f.tracker.add_exercise("Plank", "Core").await.unwrap();

        let remote = RemoteMirror::new(Arc::new(f.documents.clone()));
        remote.insert_workout("u1", &push_day()).await.unwrap();

        f.tracker.sign_in("u1").await;

        let mut workouts = f.tracker.workouts();
        wait_until(&mut workouts, |list| *list == vec![push_day()]).await;
        let mut exercises = f.tracker.exercises();
        wait_until(&mut exercises, |list| list.len() == 1 && list[0].id == "1").await;

        f.tracker.sign_out().await;
        let local = f.tracker.synchronizer().local();
        assert!(local.exercises_for_user("u1").await.unwrap().is_empty());
        assert_eq!(local.exercises_for_user("guest").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn image_gallery_goes_from_one_to_zero() {
        let f = fixture().await;
        f.tracker.sign_in("u1").await;
        f.tracker.load_workout_images("W1").await;
        f.tracker.load_workout_images("W1").await;

        let mut uploading = f.tracker.uploading_image();
        let image = f.tracker.upload_workout_image("W1", vec![1, 2, 3]).await.unwrap();
        assert!(!*uploading.borrow_and_update());

        let mut gallery = f.tracker.workout_images();
        wait_until(&mut gallery, |map| map.get("W1").map(Vec::len) == Some(1)).await;

        f.tracker.delete_workout_image(&image).await;
        wait_until(&mut gallery, |map| map.get("W1").map(Vec::len) == Some(0)).await;
        assert!(f.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn failed_upload_resets_flag() {
        let f = fixture().await;
        f.blobs.set_unavailable(true);

        assert!(f.tracker.upload_workout_image("W1", vec![1]).await.is_none());
        assert!(!*f.tracker.uploading_image().borrow());
    }

    #[tokio::test]
    async fn delete_workout_removes_images_and_gallery() {
        let f = fixture().await;
        f.tracker.sign_in("u1").await;
        let workout = f.tracker.add_workout("Push Day", "").await.unwrap().unwrap();
        f.tracker.load_workout_images(&workout.id).await;
        f.tracker.upload_workout_image(&workout.id, vec![1]).await.unwrap();
        f.tracker.upload_workout_image(&workout.id, vec![2]).await.unwrap();

        let mut gallery = f.tracker.workout_images();
        wait_until(&mut gallery, |map| map.get(&workout.id).map(Vec::len) == Some(2)).await;

        f.tracker.delete_workout(&workout.id).await.unwrap();

        assert!(!f.tracker.workout_images().borrow().contains_key(&workout.id));
        assert!(f.blobs.is_empty().await);
        assert!(f.documents.list("users/u1/images").await.unwrap().is_empty());
        assert!(f.tracker.synchronizer().get_workout(&workout.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_out_drops_image_flows() {
        let f = fixture().await;
        f.tracker.sign_in("u1").await;
        f.tracker.load_workout_images("W1").await;
        f.tracker.upload_workout_image("W1", vec![1]).await.unwrap();

        let mut gallery = f.tracker.workout_images();
        wait_until(&mut gallery, |map| map.contains_key("W1")).await;

        f.tracker.sign_out().await;
        assert!(f.tracker.workout_images().borrow().is_empty());
    }

    #[tokio::test]
    async fn dropping_tracker_stops_background_tasks() {
        let f = fixture().await;
        f.tracker.load_workout_images("W1").await;

        let mut gallery = f.tracker.workout_images();
        wait_until(&mut gallery, |map| map.contains_key("W1")).await;

        let Fixture {
            tracker,
            documents,
            blobs,
        } = f;
        drop(tracker);

        let images = ImageStore::new(Arc::new(documents), Arc::new(blobs));
        images.upload_workout_image("guest", "W1", vec![1]).await.unwrap();

        let changed = timeout(Duration::from_secs(2), gallery.changed())
            .await
            .expect("gallery receiver still waiting");
        assert!(changed.is_err());
    }
}
