//! Dispatcher-maintained registry of graph nodes.
//!
//! The audio thread owns the actual processors; this registry holds the
//! id-keyed metadata the rest of the system needs — names, labels, track
//! membership, and a shared handle to each node's frozen parameter store so
//! parameter reads never have to cross the RT boundary. All mutations
//! happen on the dispatcher thread as graph events are applied.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::parameter::{ParamHandle, ParameterStore};
use crate::processor::ObjectId;

/// Metadata snapshot of one processor or track.
#[derive(Clone)]
pub struct ProcessorInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    /// The owning track, `None` for tracks themselves.
    pub track: Option<ObjectId>,
    pub is_track: bool,
    pub parameters: Arc<ParameterStore>,
}

impl std::fmt::Debug for ProcessorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_track", &self.is_track)
            .finish()
    }
}

#[derive(Default)]
pub struct ProcessorRegistry {
    processors: DashMap<ObjectId, ProcessorInfo>,
    names: DashMap<String, ObjectId>,
    /// Track ids in insertion (render) order.
    tracks: RwLock<Vec<ObjectId>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_track(&self, info: ProcessorInfo) -> crate::Result<()> {
        if self.names.contains_key(&info.name) {
            return Err(crate::Error::DuplicateProcessorName(info.name));
        }
        self.names.insert(info.name.clone(), info.id);
        self.tracks.write().push(info.id);
        self.processors.insert(info.id, info);
        Ok(())
    }

    pub fn register_processor(&self, info: ProcessorInfo) -> crate::Result<()> {
        if self.names.contains_key(&info.name) {
            return Err(crate::Error::DuplicateProcessorName(info.name));
        }
        self.names.insert(info.name.clone(), info.id);
        self.processors.insert(info.id, info);
        Ok(())
    }

    /// Update track membership, e.g. when a processor is moved.
    pub fn set_track_membership(&self, processor: ObjectId, track: Option<ObjectId>) {
        if let Some(mut info) = self.processors.get_mut(&processor) {
            info.track = track;
        }
    }

    pub fn remove(&self, id: ObjectId) -> Option<ProcessorInfo> {
        let (_, info) = self.processors.remove(&id)?;
        self.names.remove(&info.name);
        if info.is_track {
            self.tracks.write().retain(|&t| t != id);
        }
        Some(info)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.processors.contains_key(&id)
    }

    pub fn info(&self, id: ObjectId) -> Option<ProcessorInfo> {
        self.processors.get(&id).map(|entry| entry.value().clone())
    }

    pub fn id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.names.get(name).map(|entry| *entry.value())
    }

    /// Track ids in render order.
    pub fn track_ids(&self) -> Vec<ObjectId> {
        self.tracks.read().clone()
    }

    pub fn processors_on_track(&self, track: ObjectId) -> Vec<ProcessorInfo> {
        self.processors
            .iter()
            .filter(|entry| entry.value().track == Some(track))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Resolve a global parameter id to its slot in the owner's store.
    pub fn parameter_handle(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Option<(Arc<ParameterStore>, ParamHandle)> {
        let info = self.processors.get(&processor)?;
        let handle = info.parameters.handle_by_id(parameter)?;
        Some((Arc::clone(&info.parameters), handle))
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.processors.len())
            .field("tracks", &self.tracks.read().len())
            .finish()
    }
}
