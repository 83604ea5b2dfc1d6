use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use raxa_gpu::renderer::contexts::device_ctx::device::AshDevice;
use raxa_gpu::renderer::contexts::device_ctx::instance::RenderInstance;
use raxa_gpu::renderer::resources::texture::Texture2D;
use raxa_gpu::renderer::{DeviceContext, RenderConfig, TransferCoordinator};

/// Headless smoke run: brings a device up, uploads a checkerboard texture and tears it down.
/// Takes an optional path to a TOML render config.
fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => RenderConfig::load_from_file(path)?,
        None => RenderConfig::default(),
    };
    log::info!("Using {:?}", config);

    let instance = RenderInstance::new(&config, None)?;
    let device = AshDevice::new(instance, &config, None)?;
    let queue_families = device.queue_families().clone();
    let ctx = DeviceContext::new(Arc::new(device), queue_families)?;

    let mut transfers = TransferCoordinator::new(ctx.clone(), config.prefer_transfer_queue);
    let pixels = checkerboard(64, 64);
    let texture = Texture2D::new_from_bytes(
        ctx.clone(),
        &mut transfers,
        &pixels,
        vk::Extent3D { width: 64, height: 64, depth: 1 },
        4,
    )?;
    transfers.flush()?;
    log::info!(
        "Uploaded {:?} texture through the {} queue",
        texture.format(),
        if transfers.uses_transfer_queue() { "transfer" } else { "graphics" }
    );

    ctx.wait_idle()?;
    Ok(())
}

fn checkerboard(width: u32, height: u32) -> Vec<u8> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| (x / 8 + y / 8) % 2 == 0))
        .flat_map(|light| if light { [0xff; 4] } else { [0x20, 0x20, 0x20, 0xff] })
        .collect()
}
