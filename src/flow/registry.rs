//! Per-flow extension data slots
//!
//! Every inspector that keeps state on a flow registers a module id once
//! and stores one object per flow under that id. The registry owns those
//! objects and destroys each exactly once: when it is freed explicitly or
//! when the flow itself goes away.

use log::debug;
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_FLOW_DATA_ID: AtomicU32 = AtomicU32::new(1);

/// Stable identifier of a flow data module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowDataId(u32);

impl FlowDataId {
    /// Hand out a new process-wide id. Called once per module type.
    pub fn allocate() -> Self {
        FlowDataId(NEXT_FLOW_DATA_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// State attached to a flow by one inspector
pub trait FlowData: Any {
    /// Module id this object is stored under
    fn flow_data_id(&self) -> FlowDataId;

    /// Tear the object down. The default just drops it; implementors that
    /// hold external resources release them in `Drop`.
    fn destroy(self: Box<Self>) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Extension data slots of a single flow
#[derive(Default)]
pub struct FlowDataRegistry {
    slots: Vec<Box<dyn FlowData>>,
}

impl FlowDataRegistry {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Attach `data`, destroying any previous object under the same id
    pub fn set(&mut self, data: Box<dyn FlowData>) {
        self.free(data.flow_data_id());
        self.slots.push(data);
    }

    /// Look up an object by id and type
    pub fn get<T: FlowData>(&self, id: FlowDataId) -> Option<&T> {
        self.slots
            .iter()
            .find(|d| d.flow_data_id() == id)
            .and_then(|d| d.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: FlowData>(&mut self, id: FlowDataId) -> Option<&mut T> {
        self.slots
            .iter_mut()
            .find(|d| d.flow_data_id() == id)
            .and_then(|d| d.as_any_mut().downcast_mut::<T>())
    }

    /// Look up an object, constructing it on first need.
    ///
    /// An object of another type under `id` is replaced. Returns `None`
    /// only if `construct` builds an object that reports a different id.
    pub fn get_or_insert_with<T: FlowData>(
        &mut self,
        id: FlowDataId,
        construct: impl FnOnce() -> T,
    ) -> Option<&mut T> {
        if self.get::<T>(id).is_none() {
            self.free(id);
            self.set(Box::new(construct()));
        }
        self.get_mut::<T>(id)
    }

    pub fn contains(&self, id: FlowDataId) -> bool {
        self.slots.iter().any(|d| d.flow_data_id() == id)
    }

    /// Destroy the object stored under `id`, if any
    pub fn free(&mut self, id: FlowDataId) -> bool {
        match self.slots.iter().position(|d| d.flow_data_id() == id) {
            Some(index) => {
                self.slots.swap_remove(index).destroy();
                true
            }
            None => false,
        }
    }

    /// Destroy every attached object
    pub fn clear(&mut self) {
        if !self.slots.is_empty() {
            debug!("destroying {} flow data object(s)", self.slots.len());
        }
        for data in self.slots.drain(..) {
            data.destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for FlowDataRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
