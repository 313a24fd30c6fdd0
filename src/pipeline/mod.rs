#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod decode;
pub mod detector;
pub mod overlay;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraStream, available_cameras, start_camera_stream};
pub use detector::{DetectorBackend, start_detector};
