use ash::vk;
use std::{ffi, sync::Mutex};

mod layer {
    use std::ffi::CStr;
    pub const KHRONOS_VALIDATION: &CStr = c"VK_LAYER_KHRONOS_validation";
}

const REQUIRED_DEVICE_EXTENSIONS: &[&ffi::CStr] = &[
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

#[derive(Debug)]
struct AdapterCapabilities {
    properties: vk::PhysicalDeviceProperties,
    queue_family_index: u32,
    ray_tracing: crate::RayTracingCapabilities,
}

unsafe fn inspect_adapter(
    phd: vk::PhysicalDevice,
    instance: &ash::Instance,
    driver_api_version: u32,
) -> Option<AdapterCapabilities> {
    let supported_extension_properties = match instance.enumerate_device_extension_properties(phd)
    {
        Ok(properties) => properties,
        Err(err) => {
            log::warn!("Rejected for failing to list extensions: {:?}", err);
            return None;
        }
    };
    let supported_extensions = supported_extension_properties
        .iter()
        .map(|ext_prop| ffi::CStr::from_ptr(ext_prop.extension_name.as_ptr()))
        .collect::<Vec<_>>();
    for extension in REQUIRED_DEVICE_EXTENSIONS {
        if !supported_extensions.contains(extension) {
            log::warn!(
                "Rejected for device extension {:?} not supported",
                extension
            );
            return None;
        }
    }

    let mut ray_tracing_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
    let mut acceleration_structure_properties =
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    let mut properties2 = vk::PhysicalDeviceProperties2::default()
        .push_next(&mut ray_tracing_properties)
        .push_next(&mut acceleration_structure_properties);
    instance.get_physical_device_properties2(phd, &mut properties2);
    let properties = properties2.properties;

    let name = ffi::CStr::from_ptr(properties.device_name.as_ptr());
    log::info!("Adapter {:?}", name);

    let api_version = properties.api_version.min(driver_api_version);
    if api_version < vk::API_VERSION_1_2 {
        log::warn!("\tRejected for API version {}", api_version);
        return None;
    }

    let mut buffer_device_address_features =
        vk::PhysicalDeviceBufferDeviceAddressFeatures::default();
    let mut descriptor_indexing_features = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut ray_tracing_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let mut ray_query_features = vk::PhysicalDeviceRayQueryFeaturesKHR::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut buffer_device_address_features)
        .push_next(&mut descriptor_indexing_features)
        .push_next(&mut acceleration_structure_features)
        .push_next(&mut ray_tracing_features)
        .push_next(&mut ray_query_features);
    instance.get_physical_device_features2(phd, &mut features2);

    if buffer_device_address_features.buffer_device_address == vk::FALSE {
        log::warn!(
            "\tRejected for buffer device address. Features = {:?}",
            buffer_device_address_features
        );
        return None;
    }
    if descriptor_indexing_features.descriptor_binding_partially_bound == vk::FALSE
        || descriptor_indexing_features.shader_sampled_image_array_non_uniform_indexing
            == vk::FALSE
    {
        log::warn!(
            "\tRejected for descriptor indexing. Features = {:?}",
            descriptor_indexing_features
        );
        return None;
    }
    if acceleration_structure_features.acceleration_structure == vk::FALSE
        || acceleration_structure_properties.max_instance_count == 0
    {
        log::warn!(
            "\tRejected for acceleration structure. Properties = {:?}. Features = {:?}",
            acceleration_structure_properties,
            acceleration_structure_features
        );
        return None;
    }
    if ray_tracing_features.ray_tracing_pipeline == vk::FALSE {
        log::warn!(
            "\tRejected for ray tracing pipeline. Features = {:?}",
            ray_tracing_features
        );
        return None;
    }

    let ray_query = supported_extensions.contains(&ash::khr::ray_query::NAME)
        && ray_query_features.ray_query == vk::TRUE;
    if !ray_query {
        log::info!("Ray queries are not available, shadow queries stay on the host");
    }

    let queue_family_index = instance
        .get_physical_device_queue_family_properties(phd)
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
        })? as u32;

    log::info!("Ray tracing is supported");
    log::debug!("Ray tracing properties: {ray_tracing_properties:#?}");
    Some(AdapterCapabilities {
        properties,
        queue_family_index,
        ray_tracing: crate::RayTracingCapabilities {
            shader_group_handle_size: ray_tracing_properties.shader_group_handle_size,
            shader_group_handle_alignment: ray_tracing_properties.shader_group_handle_alignment,
            shader_group_base_alignment: ray_tracing_properties.shader_group_base_alignment,
            max_ray_recursion_depth: ray_tracing_properties.max_ray_recursion_depth,
            ray_query,
        },
    })
}

impl super::Context {
    pub unsafe fn init(desc: super::ContextDesc) -> Result<Self, crate::DeviceError> {
        let entry = match ash::Entry::load() {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("Missing Vulkan entry points: {:?}", err);
                return Err(crate::DeviceError::Unsupported);
            }
        };
        let driver_api_version = match entry.try_enumerate_instance_version() {
            // Vulkan 1.1+
            Ok(Some(version)) => version,
            Ok(None) => return Err(crate::DeviceError::Unsupported),
            Err(err) => {
                log::error!("try_enumerate_instance_version: {:?}", err);
                return Err(crate::DeviceError::Unsupported);
            }
        };

        let supported_layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(err) => {
                log::error!("enumerate_instance_layer_properties: {:?}", err);
                return Err(crate::DeviceError::Unsupported);
            }
        };
        let supported_layer_names = supported_layers
            .iter()
            .map(|properties| ffi::CStr::from_ptr(properties.layer_name.as_ptr()))
            .collect::<Vec<_>>();

        let mut layers: Vec<&'static ffi::CStr> = Vec::new();
        if desc.validation {
            if supported_layer_names.contains(&layer::KHRONOS_VALIDATION) {
                layers.push(layer::KHRONOS_VALIDATION);
            } else {
                log::warn!(
                    "Requested layer is not found: {:?}",
                    layer::KHRONOS_VALIDATION
                );
            }
        }

        let supported_instance_extension_properties =
            match entry.enumerate_instance_extension_properties(None) {
                Ok(extensions) => extensions,
                Err(err) => {
                    log::error!("enumerate_instance_extension_properties: {:?}", err);
                    return Err(crate::DeviceError::Unsupported);
                }
            };
        let supported_instance_extensions = supported_instance_extension_properties
            .iter()
            .map(|ext_prop| ffi::CStr::from_ptr(ext_prop.extension_name.as_ptr()))
            .collect::<Vec<_>>();
        let has_debug_utils = supported_instance_extensions.contains(&ash::ext::debug_utils::NAME);

        let instance = {
            let mut instance_extensions: Vec<&'static ffi::CStr> = Vec::new();
            if has_debug_utils {
                instance_extensions.push(ash::ext::debug_utils::NAME);
            }
            let app_info = vk::ApplicationInfo::default()
                .engine_name(c"prism")
                .engine_version(1)
                .api_version(vk::API_VERSION_1_2);
            let str_pointers = layers
                .iter()
                .chain(instance_extensions.iter())
                .map(|&s| s.as_ptr())
                .collect::<Vec<_>>();
            let (layer_strings, extension_strings) = str_pointers.split_at(layers.len());
            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(layer_strings)
                .enabled_extension_names(extension_strings);
            entry
                .create_instance(&create_info, None)
                .map_err(super::map_result)?
        };

        let physical_devices = instance
            .enumerate_physical_devices()
            .map_err(super::map_result)?;
        let (physical_device, capabilities) = match physical_devices.into_iter().find_map(|phd| {
            inspect_adapter(phd, &instance, driver_api_version).map(|caps| (phd, caps))
        }) {
            Some(pair) => pair,
            None => {
                instance.destroy_instance(None);
                return Err(crate::DeviceError::Unsupported);
            }
        };
        log::debug!("Adapter {:#?}", capabilities);

        let device = {
            let queue_priorities = [1.0];
            let family_info = vk::DeviceQueueCreateInfo::default()
                .queue_family_index(capabilities.queue_family_index)
                .queue_priorities(&queue_priorities);
            let family_infos = [family_info];

            let mut device_extensions = REQUIRED_DEVICE_EXTENSIONS.to_vec();
            if capabilities.ray_tracing.ray_query {
                device_extensions.push(ash::khr::ray_query::NAME);
            }
            let str_pointers = device_extensions
                .iter()
                .map(|&s| s.as_ptr())
                .collect::<Vec<_>>();

            let mut buffer_device_address =
                vk::PhysicalDeviceBufferDeviceAddressFeatures::default()
                    .buffer_device_address(true);
            let mut descriptor_indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default()
                .shader_sampled_image_array_non_uniform_indexing(true)
                .shader_storage_buffer_array_non_uniform_indexing(true)
                .descriptor_binding_partially_bound(true)
                .runtime_descriptor_array(true);
            let mut acceleration_structure =
                vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
                    .acceleration_structure(true);
            let mut ray_tracing_pipeline =
                vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
                    .ray_tracing_pipeline(true);
            let mut ray_query = vk::PhysicalDeviceRayQueryFeaturesKHR::default().ray_query(true);
            let mut device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&family_infos)
                .enabled_extension_names(&str_pointers)
                .push_next(&mut buffer_device_address)
                .push_next(&mut descriptor_indexing)
                .push_next(&mut acceleration_structure)
                .push_next(&mut ray_tracing_pipeline);
            if capabilities.ray_tracing.ray_query {
                device_create_info = device_create_info.push_next(&mut ray_query);
            }

            match instance.create_device(physical_device, &device_create_info, None) {
                Ok(device) => device,
                Err(err) => {
                    log::error!("create_device: {:?}", err);
                    instance.destroy_instance(None);
                    return Err(super::map_result(err));
                }
            }
        };

        let extensions = super::Extensions {
            acceleration_structure: ash::khr::acceleration_structure::Device::new(
                &instance, &device,
            ),
            ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device::new(&instance, &device),
            debug_utils: if has_debug_utils {
                Some(ash::ext::debug_utils::Device::new(&instance, &device))
            } else {
                None
            },
        };

        let memory_manager = {
            let mem_properties = instance.get_physical_device_memory_properties(physical_device);
            let memory_types =
                &mem_properties.memory_types[..mem_properties.memory_type_count as usize];
            let limits = &capabilities.properties.limits;
            let config = gpu_alloc::Config::i_am_prototyping();

            let properties = gpu_alloc::DeviceProperties {
                max_memory_allocation_count: limits.max_memory_allocation_count,
                max_memory_allocation_size: u64::MAX,
                non_coherent_atom_size: limits.non_coherent_atom_size,
                memory_types: memory_types
                    .iter()
                    .map(|memory_type| gpu_alloc::MemoryType {
                        props: gpu_alloc::MemoryPropertyFlags::from_bits_truncate(
                            memory_type.property_flags.as_raw() as u8,
                        ),
                        heap: memory_type.heap_index,
                    })
                    .collect(),
                memory_heaps: mem_properties.memory_heaps
                    [..mem_properties.memory_heap_count as usize]
                    .iter()
                    .map(|&memory_heap| gpu_alloc::MemoryHeap {
                        size: memory_heap.size,
                    })
                    .collect(),
                buffer_device_address: true,
            };

            let known_memory_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED
                | vk::MemoryPropertyFlags::LAZILY_ALLOCATED;
            let valid_ash_memory_types = memory_types.iter().enumerate().fold(0, |u, (i, mem)| {
                if known_memory_flags.contains(mem.property_flags) {
                    u | (1 << i)
                } else {
                    u
                }
            });
            super::MemoryManager {
                allocator: gpu_alloc::GpuAllocator::new(config, properties),
                slab: slab::Slab::new(),
                valid_ash_memory_types,
            }
        };

        let submission = {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(capabilities.queue_family_index)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = device
                .create_command_pool(&pool_info, None)
                .map_err(super::map_result)?;
            let fence_info = vk::FenceCreateInfo::default();
            super::Submission {
                command_pool,
                queue: device.get_device_queue(capabilities.queue_family_index, 0),
                acceleration_build_fence: device
                    .create_fence(&fence_info, None)
                    .map_err(super::map_result)?,
                readback_fence: device
                    .create_fence(&fence_info, None)
                    .map_err(super::map_result)?,
            }
        };

        let descriptors = super::descriptor::DescriptorPool::new(&device)?;

        Ok(super::Context {
            memory: Mutex::new(memory_manager),
            descriptors: Mutex::new(descriptors),
            submission: Mutex::new(submission),
            objects: Mutex::new(super::Objects::default()),
            extensions,
            capabilities: crate::Capabilities {
                ray_tracing: Some(capabilities.ray_tracing),
            },
            device,
            physical_device,
            instance,
            _entry: entry,
        })
    }

    pub(super) fn set_object_name(&self, object: impl vk::Handle, name: &str) {
        let debug_utils = match self.extensions.debug_utils {
            Some(ref debug_utils) => debug_utils,
            None => return,
        };
        let name_cstr = match ffi::CString::new(name) {
            Ok(name_cstr) => name_cstr,
            Err(_) => return,
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(&name_cstr);
        let _ = unsafe { debug_utils.set_debug_utils_object_name(&name_info) };
    }

    /// Destroy the device. Every resource must be released beforehand.
    pub fn destroy(self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            {
                let submission = self.submission.lock().unwrap();
                self.device
                    .destroy_fence(submission.acceleration_build_fence, None);
                self.device.destroy_fence(submission.readback_fence, None);
                self.device
                    .destroy_command_pool(submission.command_pool, None);
            }
            self.descriptors.lock().unwrap().destroy(&self.device);
            {
                let mut memory = self.memory.lock().unwrap();
                memory
                    .allocator
                    .cleanup(gpu_alloc_ash::AshMemoryDevice::wrap(&self.device));
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }
}
