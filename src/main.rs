//! Headless demo: drives one training session against the in-memory robot.

use pingpong_remote::domain::config_store::Axis;
use pingpong_remote::domain::models::{AxisMode, DeviceTarget};
use pingpong_remote::domain::settings::SettingsService;
use pingpong_remote::infrastructure::link::loopback::LoopbackRobot;
use pingpong_remote::infrastructure::logging::init_logger;
use pingpong_remote::session::LoggingNotifier;
use pingpong_remote::RobotRemote;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?;
    let _logging_guard = init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting PingPong Remote (demo)");
    info!("Settings file: {}", settings.path().display());

    let robot = LoopbackRobot::ble(settings.get().link.chunk_size)
        .with_peer_name("PongBot Demo")
        .with_advertisement(DeviceTarget::new("loopback-0", "PongBot Demo"));
    let remote = RobotRemote::new(settings, Arc::new(robot.clone()), Arc::new(LoggingNotifier))
        .with_discovery(Arc::new(robot.clone()));
    let _background = remote.spawn_background();

    let found = remote.scan().await?;
    let Some(device) = found.into_iter().next() else {
        anyhow::bail!("no robot found");
    };

    let state = remote.connect_to(device.target).await;
    if !state.is_connected() {
        anyhow::bail!(
            "connection failed: {}",
            state.error.unwrap_or_else(|| "unknown".into())
        );
    }

    remote.config().update(|config| {
        config.launcher_power = 180;
        config.feeder_speed = 90;
        config.timer_index = 1;
    });
    let run = remote.start_run().await?;
    info!("Run started at {:?}", run.run_start_time);

    // A short drag gesture, then release
    for step in 0..=10 {
        let pan = f64::from(step) / 20.0;
        remote.live_aim().drag(pan, -pan / 2.0).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    remote.live_aim().release(0.5, -0.25).await;

    remote.set_axis_mode(Axis::Pan, AxisMode::Auto1);
    if robot.drop_link("demo: robot out of range") {
        warn!("Simulated link loss; the reconnect loop takes over");
    }

    remote.stop_run().await;
    remote.disconnect().await;

    info!(
        "Robot saw {} frame(s) in {} write(s)",
        robot.lines().len(),
        robot.write_count()
    );
    Ok(())
}
