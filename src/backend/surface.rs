// Window surface (VK_KHR_surface)

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use super::VulkanInstance;

pub struct Surface {
    pub loader: khr::Surface,
    pub surface: vk::SurfaceKHR,
    // Keeps the instance alive until the surface is gone
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new(instance: Arc<VulkanInstance>, window: &Window) -> Result<Self> {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;

        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        log::info!("Created window surface");

        Ok(Self {
            loader,
            surface,
            _instance: instance,
        })
    }

    /// Whether `queue_family` of `physical_device` can present to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> bool {
        let result = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )
        };
        present_support(result, queue_family)
    }
}

/// A failed query counts as "cannot present", but is still reported
fn present_support(result: ash::prelude::VkResult<bool>, queue_family: u32) -> bool {
    match result {
        Ok(supported) => supported,
        Err(e) => {
            log::warn!(
                "Present support query failed for queue family {}: {}",
                queue_family,
                e
            );
            false
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_present_query_means_no_present_support() {
        assert!(!present_support(Err(vk::Result::ERROR_SURFACE_LOST_KHR), 0));
    }

    #[test]
    fn successful_present_query_is_passed_through() {
        assert!(present_support(Ok(true), 1));
        assert!(!present_support(Ok(false), 1));
    }
}
