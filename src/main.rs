use std::fs::File;

use anyhow::Result;
use nalgebra::Vector6;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rust_stvo::config::VoConfig;
use rust_stvo::geometry::SE3;
use rust_stvo::io::TrajectoryWriter;
use rust_stvo::tracking::synthetic::{SceneConfig, SyntheticScene, SyntheticView};
use rust_stvo::tracking::StereoFrameHandler;

const N_FRAMES: u64 = 60;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rust_stvo=info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => VoConfig::from_yaml_file(&path)?,
        None => VoConfig::default(),
    };
    let mut trajectory = args
        .next()
        .map(|path| TrajectoryWriter::<File>::create(path))
        .transpose()?;

    let scene = SyntheticScene::new(
        config.camera.to_camera(),
        SceneConfig {
            n_points: 300,
            n_lines: 80,
            outlier_fraction: 0.03,
            ..Default::default()
        },
    );
    let mut handler = StereoFrameHandler::new(config, scene)?;

    // Forward motion with a slow yaw.
    let step = SE3::exp(&Vector6::new(0.0, 0.0, 0.03, 0.0, 0.004, 0.0));
    let mut t_wc = SE3::identity();
    let mut rejected = 0;

    for frame_idx in 0..N_FRAMES {
        let view = SyntheticView { t_wc };
        if let Some(summary) = handler.track(&view, &view, frame_idx)? {
            if !summary.outcome.is_accepted() {
                rejected += 1;
            }
            info!(
                frame = frame_idx,
                outcome = %summary.outcome,
                inliers = summary.n_inliers(),
                err = summary.err_norm,
                "tracked"
            );
        }
        if let (Some(writer), Some(frame)) = (trajectory.as_mut(), handler.previous_frame()) {
            writer.write_frame(frame)?;
        }
        t_wc = t_wc.compose(&step);
    }

    if let Some(writer) = trajectory.as_mut() {
        writer.flush()?;
    }

    let truth = t_wc.compose(&step.inverse());
    if let Some(estimate) = handler.pose() {
        let drift = (estimate.translation - truth.translation).norm();
        info!(frames = N_FRAMES, rejected, drift_m = drift, "sequence finished");
        if rejected > 0 {
            warn!(rejected, "some frames fell back to identity motion");
        }
    }
    Ok(())
}
