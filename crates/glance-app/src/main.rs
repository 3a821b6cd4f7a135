mod gui_app;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use glance_capture::{CaptureBackend, DisplayCatalog, VirtualBackend};
use glance_core::{BackendKind, FrameSink, GlanceConfig, GlanceError};
use glance_engine::MirrorEngine;
use tracing::info;

const APP_NAME: &str = "Glance";

fn main() -> anyhow::Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    // ── Configuration ─────────────────────────────────────────────────────
    let config = GlanceConfig::load().context("Failed to load configuration")?;
    info!(
        "Glance starting: backend={:?} fps={} preview={}×{}",
        config.capture.backend, config.capture.target_fps, config.preview.width, config.preview.height
    );

    // ── Capture runtime ───────────────────────────────────────────────────
    // Capture and the control task live on their own worker threads; the
    // egui/glow loop keeps the main thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("glance-capture")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let catalog = DisplayCatalog::new(select_backend(config.capture.backend));
    let initial = catalog
        .first_capturable()
        .context("Failed to enumerate displays")?
        .ok_or(GlanceError::NoDisplay)?;

    let sink = Arc::new(FrameSink::new());
    let engine = {
        let _enter = runtime.enter();
        Arc::new(MirrorEngine::initialize(
            catalog,
            Arc::clone(&sink),
            config.capture.clone(),
            initial,
        ))
    };

    // ── Window options ────────────────────────────────────────────────────
    let preview = config.preview.clone();
    let level = if preview.always_on_top {
        egui::WindowLevel::AlwaysOnTop
    } else {
        egui::WindowLevel::Normal
    };
    let window_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(preview.title.clone())
            .with_inner_size([preview.width, preview.height])
            .with_min_inner_size([gui_app::TOOLBAR_WIDTH, gui_app::TOOLBAR_HEIGHT])
            .with_window_level(level)
            .with_resizable(true),
        ..Default::default()
    };

    let handle = runtime.handle().clone();
    let app_engine = Arc::clone(&engine);
    eframe::run_native(
        APP_NAME,
        window_options,
        Box::new(move |cc| Ok(Box::new(gui_app::GlanceApp::new(cc, app_engine, handle, preview)))),
    )
    .map_err(|e| anyhow!("Preview window failed: {e}"))?;

    // `on_exit` normally got here first; this covers an event loop that
    // returned without calling it.
    runtime.block_on(engine.shutdown());
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Glance exited");
    Ok(())
}

fn select_backend(kind: BackendKind) -> Arc<dyn CaptureBackend> {
    match kind {
        BackendKind::Virtual => Arc::new(VirtualBackend::demo()),
        #[cfg(feature = "xcap")]
        BackendKind::Xcap => Arc::new(glance_capture::XcapBackend::new()),
        #[cfg(not(feature = "xcap"))]
        BackendKind::Xcap => {
            tracing::warn!("Built without the `xcap` feature; mirroring virtual displays instead");
            Arc::new(VirtualBackend::demo())
        }
    }
}
