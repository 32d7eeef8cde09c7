//! Sonance - headless player.
//!
//! With no arguments, lists the available output backends and their
//! devices. Otherwise plays the given files in order through the configured
//! output and exits when the queue ends or on Ctrl+C.

use std::{env::args, sync::Arc};

use {
    anyhow::Result,
    tokio::{select, signal::ctrl_c},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use sonance::{
    EngineHandler, HandlerEvent, PlayState, PlayerController, PlayerEvent, SettingsManager,
    SymphoniaDecoderFactory, Track, cpal_outputs, error::ResultExt,
};

/// Main entry point for the headless player.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let settings = Arc::new(SettingsManager::new().add_context("Failed to load settings")?);
    let controller = Arc::new(PlayerController::new());
    let handler = EngineHandler::new(
        controller.clone(),
        settings,
        Arc::new(SymphoniaDecoderFactory),
    )
    .add_context("Failed to start audio engine")?;

    for output in cpal_outputs() {
        handler.add_output(output);
    }

    let paths: Vec<String> = args().skip(1).collect();
    if paths.is_empty() {
        for name in handler.get_all_outputs() {
            println!("{name}");
            for device in handler.get_output_devices(&name) {
                println!("  {}|{}  ({})", name, device.name, device.description);
            }
        }
        return Ok(());
    }

    let player_events = controller.subscribe();
    let handler_events = handler.subscribe();
    let _event_loop = handler.start_event_loop();
    handler.setup();

    controller.set_queue(paths.iter().map(Track::from_path).collect());
    controller.play();

    loop {
        select! {
            event = player_events.recv() => match event {
                Ok(PlayerEvent::PlayStateChanged(PlayState::Stopped)) | Err(_) => break,
                Ok(PlayerEvent::CurrentTrackChanged(Some(track))) => {
                    info!(path = ?track.filepath(), "Now playing");
                }
                Ok(_) => {}
            },
            event = handler_events.recv() => match event {
                Ok(HandlerEvent::OutputChanged(name)) => info!(output = %name, "Output selected"),
                Ok(HandlerEvent::DeviceChanged(device)) => {
                    info!(device = %device, "Device selected");
                }
                Ok(_) => {}
                Err(_) => break,
            },
            result = ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {e}");
                }
                controller.stop();
                break;
            }
        }
    }

    drop(handler);
    Ok(())
}
