use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    const ENABLE_VALIDATION_LAYERS: bool = cfg!(debug_assertions);
    const REQUIRED_VALIDATION_LAYERS: &'static [&'static CStr] = &[
        c"VK_LAYER_KHRONOS_validation",
    ];

    pub fn new(window: &Window) -> Result<Self> {
        let entry = ash::Entry::linked();
        let instance = Self::create_instance(&entry, window)?;

        let debug_utils = if Self::ENABLE_VALIDATION_LAYERS {
            Some(Self::create_debug_utils_messenger(&entry, &instance)?)
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    pub fn create_surface(
        &self,
        window: &Window,
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);
        Ok((surface, surface_loader))
    }

    fn create_instance(
        entry: &ash::Entry,
        window: &Window,
    ) -> Result<ash::Instance> {
        if Self::ENABLE_VALIDATION_LAYERS {
            Self::check_validation_layers_supported(entry)?;
        }

        let application_info = vk::ApplicationInfo::default()
            .application_name(c"spinquad")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .api_version(vk::API_VERSION_1_1);
        let enabled_layer_names = if Self::ENABLE_VALIDATION_LAYERS {
            Self::REQUIRED_VALIDATION_LAYERS
                .iter()
                .map(|layer| layer.as_ptr())
                .collect::<Vec<*const c_char>>()
        } else {
            Vec::new()
        };
        let enabled_extension_names = Self::get_required_instance_extensions(window)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        // Also covers messages emitted during instance creation and destruction
        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if Self::ENABLE_VALIDATION_LAYERS {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry.create_instance(&instance_info, None)?
        })
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let debug_utils_messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)?
        };
        Ok((debug_utils_loader, debug_utils_messenger))
    }

    fn get_required_instance_extensions(window: &Window) -> Result<Vec<&'static CStr>> {
        let mut exts = ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw()
        )?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect::<Vec<_>>();

        if Self::ENABLE_VALIDATION_LAYERS {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn check_validation_layers_supported(entry: &ash::Entry) -> Result<()> {
        let layer_properties = unsafe { entry.enumerate_instance_layer_properties()? };
        let supported_layers = layer_properties
            .iter()
            .map(|props| props.layer_name_as_c_str())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for layer in Self::REQUIRED_VALIDATION_LAYERS {
            if !supported_layers.contains(layer) {
                return Err(eyre!("Validation layer {:?} not supported", layer));
            }
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

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*p_callback_data).p_message)
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("[Unknown severity]{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}
