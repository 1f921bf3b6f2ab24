// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync. Each frame in flight owns
// a fence and an image-available semaphore; render-finished semaphores are
// per swapchain image since presentation may still be reading one after the
// frame's fence has signalled.

use anyhow::{Context, Result};
use ash::vk;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        let image_available = create_semaphore(device)?;
        let in_flight_fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(e).context("Failed to create fence");
            }
        };

        Ok(Self {
            image_available,
            in_flight_fence,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

pub fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.create_semaphore(&semaphore_info, None) }.context("Failed to create semaphore")
}

/// Index of the frame being recorded, cycling through the frames in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    current: usize,
    frames: usize,
}

impl FrameCounter {
    pub fn new(frames: usize) -> Self {
        Self {
            current: 0,
            frames: frames.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_at_frame_count() {
        let mut counter = FrameCounter::new(2);
        let seen: Vec<_> = (0..5)
            .map(|_| {
                let frame = counter.current();
                counter.advance();
                frame
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn single_frame_stays_at_zero() {
        let mut counter = FrameCounter::new(1);
        counter.advance();
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn zero_frames_acts_like_one() {
        let mut counter = FrameCounter::new(0);
        counter.advance();
        assert_eq!(counter.current(), 0);
    }
}
