use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::models::WorkoutImage;

use super::blob::BlobStore;
use super::document::{encode, Document, DocumentStore};
use super::mirror::user_collection;

const IMAGES: &str = "images";
const CONTENT_TYPE: &str = "image/jpeg";

fn object_path(user_id: &str, file_name: &str) -> String {
    format!("users/{}/images/{}", user_id, file_name)
}

/// Decodes image documents of one workout, first occurrence of an id wins.
fn images_for_workout(docs: Vec<Document>, workout_id: &str) -> Vec<WorkoutImage> {
    let mut seen = HashSet::new();
    docs.into_iter()
        .filter_map(|doc| match doc.decode::<WorkoutImage>() {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!("Skipping malformed image document {}: {}", doc.id, e);
                None
            }
        })
        .filter(|image| image.workout_id == workout_id)
        .filter(|image| seen.insert(image.id.clone()))
        .collect()
}

/// Workout photos: bytes in the blob store, metadata in the `images`
/// collection of the owner's document namespace.
#[derive(Clone)]
pub struct ImageStore {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ImageStore {
    pub fn new(documents: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { documents, blobs }
    }

    pub async fn upload_workout_image(
        &self,
        user_id: &str,
        workout_id: &str,
        bytes: Vec<u8>,
    ) -> Result<WorkoutImage> {
        match self.try_upload(user_id, workout_id, bytes).await {
            Ok(image) => {
                tracing::debug!("Successfully uploaded image: {}", image.id);
                Ok(image)
            }
            Err(e) => {
                tracing::error!("Error uploading image: {}", e);
                Err(e)
            }
        }
    }

    async fn try_upload(
        &self,
        user_id: &str,
        workout_id: &str,
        bytes: Vec<u8>,
    ) -> Result<WorkoutImage> {
        let file_name = format!("workout_image_{}.jpg", Uuid::new_v4());
        let download_url = self
            .blobs
            .put(&object_path(user_id, &file_name), bytes, CONTENT_TYPE)
            .await?;

        let image = WorkoutImage {
            id: Uuid::new_v4().to_string(),
            workout_id: workout_id.to_string(),
            download_url,
            file_name,
            uploaded_at: Utc::now().timestamp_millis(),
        };

        self.documents
            .set(&user_collection(user_id, IMAGES), &image.id, encode(&image)?)
            .await?;
        Ok(image)
    }

    pub async fn list_workout_images(
        &self,
        user_id: &str,
        workout_id: &str,
    ) -> Result<Vec<WorkoutImage>> {
        let docs = self
            .documents
            .query_eq(
                &user_collection(user_id, IMAGES),
                "workoutId",
                &Value::from(workout_id),
            )
            .await?;
        Ok(images_for_workout(docs, workout_id))
    }

    pub fn watch_workout_images(
        &self,
        user_id: &str,
        workout_id: &str,
    ) -> BoxStream<'static, Result<Vec<WorkoutImage>>> {
        let workout_id = workout_id.to_string();
        self.documents
            .watch(&user_collection(user_id, IMAGES))
            .map(move |snapshot| snapshot.map(|docs| images_for_workout(docs, &workout_id)))
            .boxed()
    }

    /// Metadata goes first. If the blob delete then fails the object is
    /// orphaned; nothing restores the document.
    pub async fn delete_workout_image(&self, user_id: &str, image: &WorkoutImage) -> Result<()> {
        let result = self.try_delete(user_id, image).await;
        match &result {
            Ok(()) => tracing::debug!("Successfully deleted image: {}", image.id),
            Err(e) => tracing::error!("Error deleting image {}: {}", image.id, e),
        }
        result
    }

    async fn try_delete(&self, user_id: &str, image: &WorkoutImage) -> Result<()> {
        self.documents
            .delete(&user_collection(user_id, IMAGES), &image.id)
            .await?;
        self.blobs
            .delete(&object_path(user_id, &image.file_name))
            .await
    }

    pub async fn delete_all_workout_images(&self, user_id: &str, workout_id: &str) -> Result<()> {
        let images = self.list_workout_images(user_id, workout_id).await?;
        for image in &images {
            self.delete_workout_image(user_id, image).await?;
        }
        tracing::debug!(
            "Deleted {} images for workout: {}",
            images.len(),
            workout_id
        );
        Ok(())
    }
}
