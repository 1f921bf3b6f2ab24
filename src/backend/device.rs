// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU)
// - Queue family discovery (graphics, present, dedicated transfer)
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::swapchain::SwapchainSupport;
use super::{Surface, VulkanInstance};

/// Device extensions every candidate must support
fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Queue family indices discovered on a physical device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    /// A family with TRANSFER but neither GRAPHICS nor COMPUTE
    pub exclusive_transfer: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut present_support: impl FnMut(u32) -> bool,
    ) -> Self {
        let with_flags = |flags: vk::QueueFlags| {
            families
                .iter()
                .position(|family| family.queue_count > 0 && family.queue_flags.contains(flags))
                .map(|i| i as u32)
        };

        let graphics = with_flags(vk::QueueFlags::GRAPHICS);
        let compute = with_flags(vk::QueueFlags::COMPUTE);

        // Presenting from the graphics family avoids a queue ownership dance
        let present = match graphics {
            Some(g) if present_support(g) => Some(g),
            _ => (0..families.len() as u32)
                .filter(|&i| families[i as usize].queue_count > 0)
                .find(|&i| present_support(i)),
        };

        let exclusive_transfer = families
            .iter()
            .position(|family| {
                family.queue_count > 0
                    && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !family
                        .queue_flags
                        .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .map(|i| i as u32);

        Self {
            graphics,
            present,
            compute,
            exclusive_transfer,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Families that need a queue on the logical device
    pub fn unique_families(&self) -> BTreeSet<u32> {
        [self.graphics, self.present, self.exclusive_transfer]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Everything device selection looks at, gathered up front so scoring is a
/// pure function
#[derive(Debug, Clone, Copy)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub geometry_shader: bool,
    pub sampler_anisotropy: bool,
    pub queue_families_complete: bool,
    pub extensions_supported: bool,
    pub swapchain_adequate: bool,
}

impl DeviceCandidate {
    /// `None` when the device cannot run the renderer at all
    pub fn score(&self) -> Option<u32> {
        let base = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => return None,
        };

        if !(self.sampler_anisotropy
            && self.queue_families_complete
            && self.extensions_supported
            && self.swapchain_adequate)
        {
            return None;
        }

        Some(base + if self.geometry_shader { 10 } else { 0 })
    }
}

/// Index of the highest score; the first one wins a tie
pub fn best_candidate(scores: &[Option<u32>]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, score) in scores.iter().enumerate() {
        if let Some(score) = *score {
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((i, score));
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Highest sample count usable for both colour and depth, bounded by `cap`
/// (0 = no bound)
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits, cap: u32) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        (vk::SampleCountFlags::TYPE_64, 64),
        (vk::SampleCountFlags::TYPE_32, 32),
        (vk::SampleCountFlags::TYPE_16, 16),
        (vk::SampleCountFlags::TYPE_8, 8),
        (vk::SampleCountFlags::TYPE_4, 4),
        (vk::SampleCountFlags::TYPE_2, 2),
    ]
    .into_iter()
    .find(|&(flag, n)| counts.contains(flag) && (cap == 0 || n <= cap))
    .map_or(vk::SampleCountFlags::TYPE_1, |(flag, _)| flag)
}

/// First candidate whose format properties carry `features` for `tiling`
pub fn find_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let props = properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// CONCURRENT across `owner` and `other` when a second, distinct family
/// touches the resource, EXCLUSIVE otherwise
pub fn sharing_mode(owner: u32, other: Option<u32>) -> (vk::SharingMode, Vec<u32>) {
    match other {
        Some(other) if other != owner => (vk::SharingMode::CONCURRENT, vec![owner, other]),
        _ => (vk::SharingMode::EXCLUSIVE, vec![]),
    }
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    /// Dedicated transfer queue, or the graphics queue when there is none
    pub transfer_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue_family: u32,
    pub present_queue_family: u32,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
    pub msaa_samples: vk::SampleCountFlags,
}

impl VulkanDevice {
    /// Pick a GPU that can present to `surface` and create the logical device
    ///
    /// # Arguments
    /// * `msaa_cap` - Upper bound for the sample count (0 = highest usable)
    pub fn new(instance: Arc<VulkanInstance>, surface: &Surface, msaa_cap: u32) -> Result<Arc<Self>> {
        // Step 1: Pick physical device (GPU)
        let (physical_device, queue_families) = Self::pick_physical_device(&instance, surface)?;

        let (graphics_queue_family, present_queue_family) =
            match (queue_families.graphics, queue_families.present) {
                (Some(graphics), Some(present)) => (graphics, present),
                _ => anyhow::bail!("Selected GPU has no graphics or present queue"),
            };

        // Step 2: Cache device properties
        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let msaa_samples = max_usable_sample_count(&properties.limits, msaa_cap);

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!("MSAA samples: {}", msaa_samples.as_raw());

        // Step 3: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, &queue_families)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };
        let transfer_queue = match queue_families.exclusive_transfer {
            Some(family) => unsafe { device.get_device_queue(family, 0) },
            None => graphics_queue,
        };

        log::info!(
            "Queues: graphics={} present={} compute={:?} transfer={:?}",
            graphics_queue_family,
            present_queue_family,
            queue_families.compute,
            queue_families.exclusive_transfer
        );

        // Step 4: Create memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families,
            graphics_queue_family,
            present_queue_family,
            properties,
            msaa_samples,
        }))
    }

    fn pick_physical_device(
        instance: &VulkanInstance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut families = Vec::with_capacity(devices.len());
        let mut scores = Vec::with_capacity(devices.len());

        for &device in &devices {
            let (candidate, indices) = Self::inspect(instance, surface, device)?;
            let score = candidate.score();

            let props = unsafe { instance.instance.get_physical_device_properties(device) };
            log::info!(
                "GPU candidate: {} ({:?}) score={:?}",
                unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy(),
                props.device_type,
                score
            );

            families.push(indices);
            scores.push(score);
        }

        let best = best_candidate(&scores).context("Failed to find a suitable GPU")?;
        Ok((devices[best], families[best]))
    }

    fn inspect(
        instance: &VulkanInstance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<(DeviceCandidate, QueueFamilyIndices)> {
        let props = unsafe { instance.instance.get_physical_device_properties(device) };
        let features = unsafe { instance.instance.get_physical_device_features(device) };
        let queue_families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(device)
        };

        let indices =
            QueueFamilyIndices::find(&queue_families, |i| surface.supports_present(device, i));

        let extensions_supported = Self::supports_extensions(instance, device)?;

        // Only meaningful once the swapchain extension is known to exist
        let swapchain_adequate = extensions_supported && {
            let support = SwapchainSupport::query(surface, device)?;
            !support.formats.is_empty() && !support.present_modes.is_empty()
        };

        let candidate = DeviceCandidate {
            device_type: props.device_type,
            geometry_shader: features.geometry_shader == vk::TRUE,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            queue_families_complete: indices.is_complete(),
            extensions_supported,
            swapchain_adequate,
        };

        Ok((candidate, indices))
    }

    fn supports_extensions(instance: &VulkanInstance, device: vk::PhysicalDevice) -> Result<bool> {
        let available = unsafe {
            instance
                .instance
                .enumerate_device_extension_properties(device)
        }
        .context("Failed to enumerate device extensions")?;

        Ok(required_device_extensions().iter().all(|required| {
            available.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == *required
            })
        }))
    }

    fn create_logical_device(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = required_device_extensions().map(CStr::as_ptr);

        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        log::info!("Created logical device");
        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    pub fn depth_format(&self) -> Result<vk::Format> {
        find_supported_format(
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| self.format_properties(format),
        )
        .context("Failed to find a supported depth format")
    }

    /// Sharing mode and families for buffers touched by both the graphics and
    /// the dedicated transfer queue
    pub fn buffer_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        sharing_mode(self.graphics_queue_family, self.queue_families.exclusive_transfer)
    }

    pub fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation> {
        self.allocator
            .lock()
            .allocate(desc)
            .with_context(|| format!("Failed to allocate GPU memory for {}", desc.name))
    }

    pub fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free GPU memory: {}", e);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable(device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            geometry_shader: false,
            sampler_anisotropy: true,
            queue_families_complete: true,
            extensions_supported: true,
            swapchain_adequate: true,
        }
    }

    #[test]
    fn same_family_keeps_resources_exclusive() {
        assert_eq!(sharing_mode(0, Some(0)), (vk::SharingMode::EXCLUSIVE, vec![]));
    }

    #[test]
    fn distinct_families_share_concurrently() {
        assert_eq!(
            sharing_mode(0, Some(2)),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    #[test]
    fn no_transfer_family_keeps_buffers_exclusive() {
        assert_eq!(sharing_mode(1, None), (vk::SharingMode::EXCLUSIVE, vec![]));
    }

    #[test]
    fn graphics_family_is_preferred_for_present() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |_| true);

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.compute, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn present_falls_back_to_another_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |i| i == 1);

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique_families().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn families_without_present_are_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn exclusive_transfer_skips_graphics_and_compute() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i == 0);

        assert_eq!(indices.exclusive_transfer, Some(2));
        assert_eq!(indices.unique_families().len(), 2);
    }

    #[test]
    fn empty_families_are_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let indices = QueueFamilyIndices::find(&[empty, family(vk::QueueFlags::GRAPHICS)], |_| true);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn discrete_beats_integrated() {
        let discrete = suitable(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = DeviceCandidate {
            geometry_shader: true,
            ..suitable(vk::PhysicalDeviceType::INTEGRATED_GPU)
        };

        assert_eq!(discrete.score(), Some(1000));
        assert_eq!(integrated.score(), Some(110));
        assert_eq!(best_candidate(&[integrated.score(), discrete.score()]), Some(1));
    }

    #[test]
    fn missing_requirements_disqualify() {
        let base = suitable(vk::PhysicalDeviceType::DISCRETE_GPU);

        assert_eq!(DeviceCandidate { sampler_anisotropy: false, ..base }.score(), None);
        assert_eq!(DeviceCandidate { queue_families_complete: false, ..base }.score(), None);
        assert_eq!(DeviceCandidate { extensions_supported: false, ..base }.score(), None);
        assert_eq!(DeviceCandidate { swapchain_adequate: false, ..base }.score(), None);
        assert_eq!(suitable(vk::PhysicalDeviceType::CPU).score(), None);
    }

    #[test]
    fn ties_keep_first_device() {
        assert_eq!(best_candidate(&[Some(100), Some(100)]), Some(0));
        assert_eq!(best_candidate(&[None, None]), None);
        assert_eq!(best_candidate(&[]), None);
    }

    #[test]
    fn sample_count_uses_common_support() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };

        assert_eq!(max_usable_sample_count(&limits, 0), vk::SampleCountFlags::TYPE_4);
        assert_eq!(max_usable_sample_count(&limits, 3), vk::SampleCountFlags::TYPE_2);
        assert_eq!(max_usable_sample_count(&limits, 1), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn sample_count_defaults_to_one() {
        let limits = vk::PhysicalDeviceLimits::default();
        assert_eq!(max_usable_sample_count(&limits, 0), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn depth_format_picks_first_supported() {
        let props = |format: vk::Format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        };

        let format = find_supported_format(
            &[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            props,
        );
        assert_eq!(format, Some(vk::Format::D24_UNORM_S8_UINT));

        let linear = find_supported_format(
            &[vk::Format::D24_UNORM_S8_UINT],
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            props,
        );
        assert_eq!(linear, None);
    }

    #[test]
    fn stencil_formats() {
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }
}
