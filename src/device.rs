//! Device Bootstrap
//!
//! Minimal Vulkan initialization for compute work: loader entry, instance,
//! physical device selection and one logical device with a single
//! compute-capable queue. No surface, no swapchain.
//!
//! Everything else in the crate borrows the device through
//! [`DeviceContext`]; resources hold an `Arc` to it so the device outlives
//! every handle allocated from it.

use std::sync::Arc;

use ash::vk;

use crate::errors::{BasaltError, Result};

/// Owns the Vulkan instance, the selected physical device and the logical
/// device with its compute queue.
pub struct DeviceContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("physical_device", &self.physical_device)
            .field("queue", &self.queue)
            .field("queue_family_index", &self.queue_family_index)
            .finish_non_exhaustive()
    }
}

impl DeviceContext {
    /// Initializes Vulkan and picks the best compute-capable device,
    /// preferring a discrete GPU.
    pub fn new() -> Result<Arc<Self>> {
        unsafe { Self::init() }
    }

    unsafe fn init() -> Result<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BasaltError::LoaderUnavailable(e.to_string()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"basalt")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"basalt")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::make_api_version(0, 1, 2, 0));

        let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&instance_info, None) }?;

        let (physical_device, queue_family_index) =
            match unsafe { pick_physical_device(&instance) } {
                Ok(found) => found,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        let queue_priority = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priority);
        let queue_infos = [queue_info];
        let device_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_infos);

        let device =
            match unsafe { instance.create_device(physical_device, &device_info, None) } {
                Ok(device) => device,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = props
            .device_name_as_c_str()
            .unwrap_or(c"<unknown>")
            .to_string_lossy();
        log::debug!("Using device `{name}` with compute queue family {queue_family_index}");

        Ok(Arc::new(Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            queue,
            queue_family_index,
        }))
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Find a memory type that satisfies the type filter and has the
    /// required properties.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        let mem_props = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };
        for i in 0..mem_props.memory_type_count {
            if (type_filter & (1 << i)) != 0
                && mem_props.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
            {
                return Ok(i);
            }
        }
        Err(BasaltError::NoSuitableMemoryType(properties))
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn pick_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;
    if devices.is_empty() {
        return Err(BasaltError::NoComputeDevice);
    }

    // Prefer discrete GPU
    let mut best: Option<(vk::PhysicalDevice, u32, bool)> = None;

    for &pd in &devices {
        let props = unsafe { instance.get_physical_device_properties(pd) };
        let is_discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(pd) };
        for (i, qf) in queue_families.iter().enumerate() {
            if qf.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                match best {
                    None => best = Some((pd, i as u32, is_discrete)),
                    Some((_, _, prev_discrete)) if !prev_discrete && is_discrete => {
                        best = Some((pd, i as u32, is_discrete));
                    }
                    _ => {}
                }
                break;
            }
        }
    }

    best.map(|(pd, qi, _)| (pd, qi))
        .ok_or(BasaltError::NoComputeDevice)
}
