mod exercise;
mod image;
mod workout;

pub use exercise::Exercise;
pub use image::WorkoutImage;
pub use workout::Workout;
