use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use crate::renderer::config::RenderConfig;
use crate::renderer::error::{GfxResult, GraphicsError};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Loads Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    /// `display` is only needed when a window surface will be created later.
    pub fn new(
        config: &RenderConfig,
        display: Option<RawDisplayHandle>,
    ) -> GfxResult<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            log::error!("Unable to load the Vulkan library: {}", e);
            GraphicsError::InitializationFailed
        })?;

        if config.validation {
            Self::check_validation_layer_supported(&entry)?;
        }

        let instance = Self::create_instance(&entry, config.validation, display)?;

        let debug_utils = if config.validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let info = debug_utils_messenger_create_info();
            let messenger = unsafe {
                loader
                    .create_debug_utils_messenger(&info, None)
                    .map_err(GraphicsError::from)?
            };
            Some((loader, messenger))
        } else {
            None
        };

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_utils,
        }))
    }

    pub fn create_surface(
        self: &Arc<Self>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GfxResult<Surface> {
        let handle = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, window, None)
                .map_err(|e| {
                    log::error!("Unable to create window surface: {}", e);
                    GraphicsError::from(e)
                })?
        };
        let loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);
        Ok(Surface {
            handle,
            loader,
            _instance: self.clone(),
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> GfxResult<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"raxa-gpu")
            .engine_name(c"raxa-gpu")
            .api_version(vk::API_VERSION_1_2);

        let enabled_layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut extensions: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(GraphicsError::from)?
                .to_vec(),
            None => Vec::new(),
        };
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&extensions);

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        unsafe {
            entry.create_instance(&instance_info, None).map_err(|e| {
                log::error!("Unable to create Vulkan instance: {}", e);
                GraphicsError::from(e)
            })
        }
    }

    fn check_validation_layer_supported(entry: &ash::Entry) -> GfxResult<()> {
        let layers = unsafe {
            entry
                .enumerate_instance_layer_properties()
                .map_err(GraphicsError::from)?
        };
        let supported = layers.iter().any(|props| {
            props
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER)
        });
        if !supported {
            log::error!("Validation layer {:?} not supported", VALIDATION_LAYER);
            return Err(GraphicsError::NoSuchLayer);
        }
        Ok(())
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Presentable surface created from the host window's raw handles
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub(crate) loader: ash::khr::surface::Instance,
    _instance: Arc<RenderInstance>,
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        _ => "unknown",
    };
    let message = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*p_callback_data).p_message)
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::trace!("[{}] {:?}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("[{}] {:?}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{}] {:?}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{}] {:?}", kind, message),
        _ => log::warn!("[{}] {:?}", kind, message),
    }

    vk::FALSE
}
