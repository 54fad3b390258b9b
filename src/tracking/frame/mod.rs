//! Frame-level data: camera model, stereo features, and the frame arena.

pub mod camera;
pub mod features;
pub mod stereo;

pub use camera::{line_equation, PinholeStereoCamera};
pub use features::{angle_diff, BinaryDescriptor, LineFeature, PointFeature, TrackId};
pub use stereo::{StereoFrame, REJECTED_ERROR};
