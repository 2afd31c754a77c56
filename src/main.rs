//! passthrough-overlay - synthetic end-to-end run of the overlay engine.
//!
//! A fake detector and a fake depth sensor push into the pipeline inbox at
//! their own rates while a render loop ticks the pipeline. The scene holds a
//! book on a desk, a person standing still and a screen the viewer walks
//! towards, so the screen swaps from its far to its near variant halfway
//! through. Final per-overlay diagnostics are printed as JSON.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{error, info};
use nalgebra::Vector3;
use passthrough_overlay::core_modules::assets::{AssetBindings, InMemoryAssets};
use passthrough_overlay::core_modules::camera::{DepthFrame, PinholeCamera};
use passthrough_overlay::core_modules::spatial::Pose;
use passthrough_overlay::inbox::{self, InboxSender};
use passthrough_overlay::pipeline::{BoundingBox, Detection, OverlayPipeline, PipelineConfig, load_config};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const IMAGE_WIDTH: u32 = 640;
const IMAGE_HEIGHT: u32 = 480;
const VERTICAL_FOV_DEGREES: f32 = 60.0;
const DEPTH_WIDTH: u32 = 64;
const DEPTH_HEIGHT: u32 = 48;
const EYE_HEIGHT: f32 = 1.6;

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive the overlay engine with a synthetic passthrough scene")]
struct Args {
    /// Optional TOML configuration file.
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,
    /// Duration of the run in seconds.
    #[arg(long, default_value_t = 6.0)]
    seconds: f32,
    /// Render loop rate.
    #[arg(long, default_value_t = 72)]
    render_hz: u32,
    /// Detector batch rate.
    #[arg(long, default_value_t = 15)]
    detector_hz: u32,
    /// Depth frame rate.
    #[arg(long, default_value_t = 30)]
    depth_hz: u32,
}

fn period(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(hz))
}

fn demo_bindings() -> AssetBindings {
    AssetBindings {
        screen_near: Some("typewriter_high".into()),
        screen_far: Some("typewriter_low".into()),
        book: Some("newspaper".into()),
        human: Some("top_hat".into()),
    }
}

fn demo_assets() -> InMemoryAssets {
    InMemoryAssets::new()
        .with_asset("typewriter_high", Vector3::repeat(0.4))
        .with_asset("typewriter_low", Vector3::repeat(0.4))
        .with_asset("newspaper", Vector3::new(0.3, 0.02, 0.4))
        .with_asset("top_hat", Vector3::repeat(0.25))
}

fn viewer_pose() -> Pose {
    let mut pose = Pose::identity();
    pose.position = Vector3::new(0.0, EYE_HEIGHT, 0.0);
    pose
}

/// Distance to the wall the viewer is walking towards.
fn wall_distance(elapsed: f32) -> f32 {
    (3.0 - 0.4 * elapsed).max(0.8)
}

/// Small deterministic jitter, in pixels.
fn jitter(frame: u32, phase: f32) -> f32 {
    ((frame as f32 * 0.7 + phase).sin()) * 4.0
}

fn synthetic_batch(frame: u32) -> Vec<Detection> {
    let j = |phase| jitter(frame, phase);
    let mut batch = vec![
        Detection::new(
            "book 0.88",
            BoundingBox::new(80.0 + j(0.0), 300.0 + j(1.0), 200.0 + j(2.0), 380.0 + j(3.0)),
        ),
        Detection::new(
            "tv 0.64",
            BoundingBox::new(260.0 + j(4.0), 140.0, 380.0 + j(5.0), 230.0),
        ),
    ];
    // The person drops out every fifth frame; the grace period bridges it.
    if frame % 5 != 4 {
        batch.push(Detection::new(
            "person 0.71",
            BoundingBox::new(460.0 + j(6.0), 120.0, 560.0 + j(7.0), 470.0),
        ));
    }
    // A weak, one-off false positive that never passes the confidence gate.
    if frame == 3 {
        batch.push(Detection::new("laptop 0.12", BoundingBox::new(0.0, 0.0, 50.0, 50.0)));
    }
    batch
}

fn synthetic_depth(camera: &PinholeCamera, elapsed: f32) -> Result<DepthFrame> {
    let pose = viewer_pose();
    let per_eye = (DEPTH_WIDTH * DEPTH_HEIGHT) as usize;
    let samples = vec![wall_distance(elapsed); per_eye * 2];
    let view_projection = camera.view_projection(&pose);
    DepthFrame::from_raw(
        pose,
        DEPTH_WIDTH,
        DEPTH_HEIGHT,
        samples,
        vec![view_projection, view_projection],
    )
    .context("building synthetic depth frame")
}

async fn run_detector(sender: InboxSender, hz: u32) {
    let mut interval = tokio::time::interval(period(hz));
    let mut frame = 0u32;
    loop {
        interval.tick().await;
        if sender.send_batch(synthetic_batch(frame)).is_err() {
            break;
        }
        frame = frame.wrapping_add(1);
    }
}

async fn run_depth_sensor(sender: InboxSender, camera: PinholeCamera, hz: u32, start: Instant) {
    let mut interval = tokio::time::interval(period(hz));
    loop {
        interval.tick().await;
        let frame = match synthetic_depth(&camera, start.elapsed().as_secs_f32()) {
            Ok(frame) => frame,
            Err(err) => {
                error!("depth sensor stopped: {err:#}");
                break;
            }
        };
        if sender.send_depth(frame).is_err() {
            break;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.render_hz == 0 || args.detector_hz == 0 || args.depth_hz == 0 {
        return Err(anyhow!("rates must be >= 1"));
    }
    let run_for = Duration::try_from_secs_f32(args.seconds)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| anyhow!("seconds must be a positive duration"))?;

    let mut config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if config.presentation.assets == AssetBindings::default() {
        config.presentation.assets = demo_bindings();
    }

    let camera = PinholeCamera::new(IMAGE_WIDTH, IMAGE_HEIGHT, VERTICAL_FOV_DEGREES).with_pose(viewer_pose());
    let mut pipeline = OverlayPipeline::new(config, camera.clone(), demo_assets());
    let (sender, inbox) = inbox::channel();
    pipeline.attach_inbox(inbox);

    let start = Instant::now();
    let detector = tokio::spawn(run_detector(sender.clone(), args.detector_hz));
    let depth = tokio::spawn(run_depth_sensor(sender, camera, args.depth_hz, start));

    let mut render = tokio::time::interval(period(args.render_hz));
    let mut last = start.elapsed();
    let mut ticks = 0u64;
    let (mut spawned, mut swapped, mut expired) = (0usize, 0usize, 0usize);

    loop {
        render.tick().await;
        let now = start.elapsed();
        if now >= run_for {
            break;
        }
        let report = pipeline.tick(now, (now - last).as_secs_f32());
        last = now;
        ticks += 1;
        spawned += report.spawned;
        swapped += report.swapped;
        expired += report.expired;
        if report.spawned > 0 || report.swapped > 0 || report.expired > 0 {
            info!(
                "t={:.2}s spawned={} swapped={} expired={} active={}",
                now.as_secs_f32(),
                report.spawned,
                report.swapped,
                report.expired,
                report.active
            );
        }
    }

    detector.abort();
    depth.abort();

    info!(
        "{ticks} ticks, {spawned} spawns, {swapped} swaps, {expired} expiries, {} live instances",
        pipeline.assets().live_count()
    );
    println!("{}", serde_json::to_string_pretty(&pipeline.diagnostics())?);
    pipeline.clear();
    Ok(())
}
