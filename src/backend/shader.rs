// Shader module loading and hot reload
//
// Vulkan uses SPIR-V bytecode for shaders. Compiled .spv files are read at
// runtime so they can be rebuilt and swapped in while the viewer runs.

use anyhow::{Context, Result};
use ash::vk;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use super::VulkanDevice;

/// Read a compiled shader into properly aligned SPIR-V words
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    if path.extension().and_then(|ext| ext.to_str()) != Some("spv") {
        anyhow::bail!("Shader file must have a .spv extension: {:?}", path);
    }

    let mut file =
        File::open(path).with_context(|| format!("Failed to open shader {:?}", path))?;

    ash::util::read_spv(&mut file).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Watches shader files and reports when any of them was rewritten
pub struct ShaderWatcher {
    files: Vec<PathBuf>,
    events: Receiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl ShaderWatcher {
    pub fn new(files: &[PathBuf]) -> Result<Self> {
        let (tx, events) = channel();

        let mut watcher = notify::recommended_watcher(move |event| {
            // The receiver only goes away when the watcher does
            let _ = tx.send(event);
        })
        .context("Failed to create shader watcher")?;

        let files: Vec<PathBuf> = files.iter().map(|f| absolute(f)).collect();

        // Editors often replace files instead of writing in place, so watch
        // the directories rather than the files themselves
        let dirs: BTreeSet<PathBuf> = files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect();

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {:?}", dir))?;
            log::info!("Watching {:?} for shader changes", dir);
        }

        Ok(Self {
            files,
            events,
            _watcher: watcher,
        })
    }

    /// Drain pending events; true if a watched shader changed since last poll
    pub fn poll(&self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                Ok(event) => changed |= is_relevant(&event, &self.files),
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        }
        changed
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_relevant(event: &Event, files: &[PathBuf]) -> bool {
    let modifies = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    modifies && event.paths.iter().any(|p| files.iter().any(|f| f == p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn non_spv_paths_are_rejected() {
        let err = load_spirv(Path::new("shaders/model.vert")).unwrap_err();
        assert!(err.to_string().contains(".spv"));
    }

    #[test]
    fn missing_spv_file_is_an_error() {
        assert!(load_spirv(Path::new("shaders/does_not_exist.spv")).is_err());
    }

    #[test]
    fn writes_to_watched_files_are_relevant() {
        let files = [PathBuf::from("/s/model.vert.spv")];

        assert!(is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/s/model.vert.spv"),
            &files
        ));
        assert!(is_relevant(
            &event(EventKind::Create(CreateKind::File), "/s/model.vert.spv"),
            &files
        ));
    }

    #[test]
    fn other_files_and_kinds_are_ignored() {
        let files = [PathBuf::from("/s/model.vert.spv")];

        assert!(!is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/s/model.vert"),
            &files
        ));
        assert!(!is_relevant(
            &event(EventKind::Remove(RemoveKind::File), "/s/model.vert.spv"),
            &files
        ));
        assert!(!is_relevant(
            &event(EventKind::Access(AccessKind::Any), "/s/model.vert.spv"),
            &files
        ));
    }
}
