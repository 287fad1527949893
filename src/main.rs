use std::path::PathBuf;
use std::sync::Arc;

use gym_sync::auth::{AuthState, UserScope};
use gym_sync::catalog;
use gym_sync::config::Config;
use gym_sync::db::LocalStore;
use gym_sync::error::{AppError, Result};
use gym_sync::remote::{
    BlobStore, DocumentStore, HttpBlobStore, HttpDocumentStore, ImageStore, MemoryBlobStore,
    MemoryDocumentStore, RemoteMirror,
};
use gym_sync::sync::Synchronizer;
use gym_sync::tracker::{filter_workouts, GymTracker};

const USAGE: &str = "Usage:
  gym-sync --sign-in <uid>
  gym-sync --sign-out [uid]
  gym-sync --list [uid] [--filter A,B]
  gym-sync --upload <uid> <workout-id> <file>
  gym-sync --catalog [search]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        println!("{}", USAGE);
        return Ok(());
    };

    // Catalog lookups need neither storage nor config
    if command == "--catalog" {
        let text = args.get(2).map(String::as_str).unwrap_or("");
        for exercise in catalog::search(text, None) {
            println!("{:>3}  {:<30} {}", exercise.id, exercise.name, exercise.muscle_group);
        }
        return Ok(());
    }

    let config = Config::load()?;
    let tracker = build_tracker(&config).await?;

    match command.as_str() {
        "--sign-in" => {
            let uid = required(&args, 2, "user id")?;
            tracker.sign_in(uid).await;
            let local = tracker.synchronizer().local();
            println!(
                "Signed in as {}: {} exercises, {} workouts",
                uid,
                local.exercises_for_user(uid).await?.len(),
                local.workouts_for_user(uid).await?.len()
            );
        }
        "--sign-out" => {
            let scope = UserScope::from_user_id(args.get(2).map(String::as_str));
            tracker.synchronizer().auth().set(scope.clone());
            tracker.sign_out().await;
            println!("Signed out {}, local data cleared", scope);
        }
        "--list" => {
            let (scope, filter) = parse_list_args(&args[2..]);
            let workouts = tracker
                .synchronizer()
                .local()
                .workouts_for_user(scope.user_id())
                .await?;
            for workout in filter_workouts(&workouts, &filter) {
                println!("{}  {}", workout.id, workout.name);
                if !workout.description.is_empty() {
                    println!("    {}", workout.description);
                }
                for exercise in &workout.exercises {
                    println!("    - {} ({})", exercise.name, exercise.muscle_group);
                }
            }
        }
        "--upload" => {
            let uid = required(&args, 2, "user id")?;
            let workout_id = required(&args, 3, "workout id")?;
            let path = PathBuf::from(required(&args, 4, "image file")?);

            let bytes = tokio::fs::read(&path).await?;
            tracker
                .synchronizer()
                .auth()
                .set(UserScope::from_user_id(Some(uid)));
            match tracker.upload_workout_image(workout_id, bytes).await {
                Some(image) => println!("Uploaded {:?} as {}", path, image.download_url),
                None => eprintln!("Upload of {:?} failed", path),
            }
        }
        _ => {
            eprintln!("Unknown option: {}\n{}", command, USAGE);
        }
    }

    Ok(())
}

async fn build_tracker(config: &Config) -> Result<GymTracker> {
    let local = LocalStore::open(&config.db_path).await?;

    let documents: Arc<dyn DocumentStore>;
    let blobs: Arc<dyn BlobStore>;
    match &config.remote {
        Some(remote) => {
            documents = Arc::new(HttpDocumentStore::new(
                &remote.documents_url,
                remote.api_token.clone(),
                config.request_timeout(),
                config.poll_interval(),
            )?);
            blobs = Arc::new(HttpBlobStore::new(
                &remote.blobs_url,
                remote.api_token.clone(),
                config.request_timeout(),
            )?);
        }
        None => {
            tracing::warn!("No remote configured, cloud mirror is kept in memory only");
            documents = Arc::new(MemoryDocumentStore::new());
            blobs = Arc::new(MemoryBlobStore::new());
        }
    }

    let sync = Synchronizer::new(local, RemoteMirror::new(documents.clone()), AuthState::default());
    Ok(GymTracker::new(sync, ImageStore::new(documents, blobs)))
}

fn required<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| AppError::Config(format!("missing {}\n{}", what, USAGE)))
}

/// `[uid] [--filter A,B]` in either order.
fn parse_list_args(args: &[String]) -> (UserScope, Vec<String>) {
    let mut user_id = None;
    let mut filter = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--filter" {
            if let Some(groups) = iter.next() {
                filter = groups
                    .split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(String::from)
                    .collect();
            }
        } else {
            user_id = Some(arg.as_str());
        }
    }

    (UserScope::from_user_id(user_id), filter)
}
