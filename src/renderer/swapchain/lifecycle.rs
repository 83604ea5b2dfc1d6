use std::sync::Arc;
use ash::vk;
use crate::renderer::contexts::device_ctx::DeviceContext;
use crate::renderer::error::{GfxResult, GraphicsError};
use crate::renderer::swapchain::{Swapchain, SwapchainPreferences};

/// Releases everything built on top of the swapchain that is about to go away.
pub type OnDestroy = Box<dyn FnMut(&Swapchain)>;
/// Rebuilds the swapchain-dependent objects for the new swapchain.
pub type OnCreate = Box<dyn FnMut(&Swapchain) -> GfxResult<()>>;

/// Owns the swapchain of one surface and rebuilds it when it goes stale.
///
/// Framebuffers, depth targets and anything else sized after the swapchain register an
/// `(on_destroy, on_create)` pair. On recreation every `on_destroy` runs, the swapchain is
/// rebuilt, then every `on_create` runs, both in registration order.
///
/// A new lifecycle starts out of date; the first `update` creates the swapchain.
pub struct SwapchainLifecycle {
    surface: vk::SurfaceKHR,
    prefs: SwapchainPreferences,
    requested_extent: vk::Extent2D,
    swapchain: Option<Swapchain>,
    callbacks: Vec<(OnDestroy, OnCreate)>,
    out_of_date: bool,
    ctx: Arc<DeviceContext>,
}

impl SwapchainLifecycle {
    pub fn new(
        ctx: Arc<DeviceContext>,
        surface: vk::SurfaceKHR,
        prefs: SwapchainPreferences,
        requested_extent: vk::Extent2D,
    ) -> Self {
        Self {
            surface,
            prefs,
            requested_extent,
            swapchain: None,
            callbacks: Vec::new(),
            out_of_date: true,
            ctx,
        }
    }

    pub fn register_on_recreate(&mut self, on_destroy: OnDestroy, on_create: OnCreate) {
        self.callbacks.push((on_destroy, on_create));
    }

    pub fn mark_out_of_date(&mut self) {
        if !self.out_of_date {
            log::warn!("Swapchain marked out of date");
        }
        self.out_of_date = true;
    }

    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date
    }

    /// New window size, used when the surface leaves the extent up to the application.
    pub fn resize(&mut self, extent: vk::Extent2D) {
        self.requested_extent = extent;
        self.mark_out_of_date();
    }

    /// Recreates the swapchain when marked. Returns whether a usable swapchain exists afterwards.
    pub fn update(&mut self) -> GfxResult<bool> {
        if self.out_of_date {
            self.recreate()?;
        }
        Ok(!self.out_of_date)
    }

    /// Waits for the device, tears down dependents, rebuilds the swapchain and its dependents.
    ///
    /// A zero-sized surface leaves the lifecycle out of date without an error; the next
    /// `update` tries again.
    pub fn recreate(&mut self) -> GfxResult<()> {
        self.out_of_date = true;
        self.ctx.wait_idle()?;

        if let Some(old) = self.swapchain.as_ref() {
            for (on_destroy, _) in self.callbacks.iter_mut() {
                on_destroy(old);
            }
        }

        let old_handle = self
            .swapchain
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), Swapchain::handle);
        let result = Swapchain::new(
            self.ctx.clone(),
            self.surface,
            &self.prefs,
            self.requested_extent,
            old_handle,
        );
        // The retired swapchain is only needed as `old_swapchain` for the call above
        self.swapchain = None;

        let swapchain = match result {
            Ok(swapchain) => self.swapchain.insert(swapchain),
            Err(GraphicsError::SwapchainOutOfDate) => {
                log::debug!("Surface not presentable yet, swapchain stays out of date");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for (_, on_create) in self.callbacks.iter_mut() {
            on_create(swapchain)?;
        }
        self.out_of_date = false;
        Ok(())
    }

    /// Acquires the next image, marking the lifecycle when the swapchain no longer fits the
    /// surface. A suboptimal image is still returned and can be rendered to.
    pub fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> GfxResult<u32> {
        let swapchain = match self.swapchain.as_ref() {
            Some(swapchain) if !self.out_of_date => swapchain,
            _ => return Err(GraphicsError::SwapchainOutOfDate),
        };
        match swapchain.acquire_next_image(semaphore) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.mark_out_of_date();
                }
                Ok(index)
            }
            Err(e) => {
                if e.is_swapchain_stale() {
                    self.mark_out_of_date();
                }
                Err(e)
            }
        }
    }

    pub fn present(&mut self, wait_semaphores: &[vk::Semaphore], image_index: u32) -> GfxResult<()> {
        let swapchain = self.swapchain.as_ref().ok_or(GraphicsError::SwapchainOutOfDate)?;
        match swapchain.present(wait_semaphores, image_index) {
            Ok(suboptimal) => {
                if suboptimal {
                    self.mark_out_of_date();
                }
                Ok(())
            }
            Err(e) => {
                if e.is_swapchain_stale() {
                    self.mark_out_of_date();
                }
                Err(e)
            }
        }
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for SwapchainLifecycle {
    fn drop(&mut self) {
        if let Some(swapchain) = self.swapchain.as_ref() {
            let _ = self.ctx.wait_idle();
            for (on_destroy, _) in self.callbacks.iter_mut() {
                on_destroy(swapchain);
            }
        }
    }
}
