//! `canvas-relay demo`: drive a host through a small scene and save the
//! result as a PNG.

use std::f64::consts::PI;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, warn};

use canvas_relay_driver::{Canvas2d, DriverError, start_driver};
use canvas_relay_host::{Dispatcher, HostOptions, spawn_host};
use canvas_relay_surface::SoftwareBackend;

pub async fn run(bind: &str, out: &Path, local: bool) -> anyhow::Result<()> {
    let driver = start_driver(bind).await?;
    let address = driver.local_addr().to_string();

    let local_host = local.then(|| {
        let dispatcher = Dispatcher::new(Box::new(SoftwareBackend::new()));
        spawn_host(
            HostOptions {
                address: address.clone(),
                reconnect_delay: Duration::from_millis(200),
            },
            dispatcher,
        )
    });
    if local_host.is_none() {
        info!("Waiting for a host; run `canvas-relay host --address {address}`");
    }

    if !driver.wait_for_host().await {
        anyhow::bail!("driver stopped before a host connected");
    }

    let mut canvas = driver
        .create_canvas(300, 150)
        .await
        .context("creating demo canvas")?;
    draw_scene(&mut canvas).await?;

    let url = canvas.to_data_url("image/png", None).await?;
    let payload = url
        .strip_prefix("data:image/png;base64,")
        .context("host returned a non-PNG data URL")?;
    let png = STANDARD.decode(payload)?;
    std::fs::write(out, &png).with_context(|| format!("writing {}", out.display()))?;
    info!(bytes = png.len(), path = %out.display(), "Demo scene written");

    drop(canvas);
    if let Some((handle, task)) = local_host {
        handle.shutdown();
        let _ = task.await;
    }
    driver.shutdown();
    Ok(())
}

async fn draw_scene(canvas: &mut Canvas2d) -> Result<(), DriverError> {
    canvas.set_fill_style("#f4f1ea").await?;
    canvas.fill_rect(0.0, 0.0, 300.0, 150.0).await?;

    canvas.set_fill_style("rgba(200, 30, 30, 0.9)").await?;
    canvas.fill_rect(20.0, 20.0, 80.0, 60.0).await?;

    let sun = canvas.new_path().await?;
    canvas
        .arc(Some(&sun), 210.0, 60.0, 35.0, 0.0, 2.0 * PI, false)
        .await?;
    canvas.set_fill_style("orange").await?;
    canvas.fill(Some(&sun), false).await?;

    canvas.set_stroke_style("#223").await?;
    canvas.set_line_width(3.0).await?;
    canvas.set_line_dash(vec![8.0, 4.0]).await?;
    canvas.begin_path().await?;
    canvas.move_to(None, 10.0, 130.0).await?;
    canvas.line_to(None, 290.0, 130.0).await?;
    canvas.stroke(None).await?;

    canvas.set_fill_style("#223").await?;
    canvas.set_font("16px sans-serif").await?;
    // Hosts without fonts report an error; the scene is still usable.
    if let Err(e) = canvas.fill_text("canvas-relay", 20.0, 110.0, None).await {
        warn!(error = %e, "Skipping demo text");
    }
    Ok(())
}
