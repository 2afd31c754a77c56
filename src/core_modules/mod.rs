pub mod assets;
pub mod camera;
pub mod classifier;
pub mod detection;
pub mod geometry;
pub mod presenter;
pub mod smoother;
pub mod spatial;
pub mod tracker;
pub mod tuning;
