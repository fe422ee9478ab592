//! A drive controller that integrates wheel speeds into odometry on a
//! repeating tick, and routes its telemetry to a separate logger actor.
//!
//! Run with `cargo run -p colony --example telemetry`.
use std::time::Duration;

use colony::prelude::*;
use serde::{Deserialize, Serialize};

const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WheelSpeeds {
    left: f64,
    right: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Odometry {
    distance: f64,
    heading: f64,
}

struct Drive {
    track_width: f64,
    speeds: WheelSpeeds,
    odometry: Odometry,
    tick: Option<TimerId>,
}

impl Drive {
    fn new(track_width: f64) -> Self {
        Self {
            track_width,
            speeds: WheelSpeeds {
                left: 0.0,
                right: 0.0,
            },
            odometry: Odometry::default(),
            tick: None,
        }
    }

    fn integrate(&mut self, dt: f64) {
        let WheelSpeeds { left, right } = self.speeds;
        self.odometry.distance += (left + right) / 2.0 * dt;
        self.odometry.heading += (right - left) / self.track_width * dt;
    }
}

impl Actor for Drive {
    fn on_init(&mut self, ctx: &mut Context<'_, Self>, _message: &Message) -> HandlerResult {
        ctx.subscribe("SetSpeeds", |drive, _, message| {
            drive.speeds = message.decode()?;
            Ok(())
        });
        ctx.subscribe("Tick", |drive, ctx, _| {
            drive.integrate(TICK.as_secs_f64());
            // Sent to ourselves; the route set by main forwards it to the logger.
            let telemetry = Message::from_data("Telemetry", &drive.odometry)?;
            ctx.send(ctx.id(), telemetry);
            Ok(())
        });
        self.tick = Some(ctx.start_timer(TICK, Message::new("Tick"), true));
        Ok(())
    }

    fn on_finalize(&mut self, ctx: &mut Context<'_, Self>, _message: &Message) -> HandlerResult {
        if let Some(tick) = self.tick.take() {
            ctx.cancel_timer(tick);
        }
        tracing::info!(odometry = ?self.odometry, "drive stopped");
        Ok(())
    }
}

struct Logger {
    lines: usize,
}

impl Actor for Logger {
    fn on_init(&mut self, ctx: &mut Context<'_, Self>, _message: &Message) -> HandlerResult {
        ctx.subscribe("Telemetry", |logger, _, message| {
            logger.lines += 1;
            let odometry: Odometry = message.decode()?;
            tracing::info!(
                from = ?message.original_recipient(),
                distance = odometry.distance,
                heading = odometry.heading,
                "telemetry"
            );
            Ok(())
        });
        Ok(())
    }

    fn on_finalize(&mut self, _ctx: &mut Context<'_, Self>, _message: &Message) -> HandlerResult {
        tracing::info!(lines = self.lines, "logger stopped");
        Ok(())
    }

    // Stands in for an actor writing to disk.
    fn uses_blocking_pool(&self) -> bool {
        true
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_thread_names(true).init();

    let system = System::new(RuntimeConfig {
        shutdown_grace: Duration::from_millis(250),
        ..RuntimeConfig::named("rover")
    })?;
    let logger = system.create(Logger { lines: 0 })?;
    let drive = system.create(Drive::new(0.5))?;
    system.set_route(drive, "Telemetry", Some(logger));

    let speeds = Message::from_data("SetSpeeds", &WheelSpeeds { left: 0.4, right: 0.6 })?;
    system.send(drive, speeds, ActorId::INIT);
    std::thread::sleep(Duration::from_secs(1));

    system.shutdown_actor(drive, false);
    system.shutdown_actor(logger, false);
    std::thread::sleep(Duration::from_millis(500));

    let report = system.flush_stats();
    println!("{}", serde_json::to_string_pretty(&report)?);

    system.shutdown();
    system.wait_for_shutdown();
    Ok(())
}
