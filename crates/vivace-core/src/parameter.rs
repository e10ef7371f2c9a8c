//! Typed parameter descriptors, value storage, and normalized↔domain
//! conversion.
//!
//! Parameters are registered while a processor is being constructed, before
//! it joins the audio graph. After that the set is frozen: descriptors are
//! immutable, numeric values live in atomic cells written only by the audio
//! thread (in response to RT events) and read wait-free from anywhere.
//!
//! Normalized form is always `[0.0, 1.0]`; a [`ParameterScale`] maps it to
//! the domain value.
//!
//! # Example
//!
//! ```
//! use vivace_core::parameter::{ParameterScale, ParameterStoreBuilder};
//!
//! let mut builder = ParameterStoreBuilder::new();
//! let cutoff = builder
//!     .register_float_parameter("cutoff", "Cutoff", "Hz", 0.5, 20.0, 20000.0,
//!                               ParameterScale::Logarithmic)
//!     .unwrap();
//! let store = builder.build();
//!
//! store.set_normalized(cutoff, 0.5);
//! let hz = store.value(cutoff); // ~632 Hz (geometric mean)
//! assert!((hz - 632.45).abs() < 1.0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use atomic_float::AtomicF32;

use crate::processor::{next_object_id, ObjectId};

/// Globally unique parameter identifier.
pub type ParamId = ObjectId;

/// Index of a parameter inside its owning store. Stable for the store's
/// lifetime; used by processors for hot-path access.
pub type ParamHandle = usize;

/// Value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Float,
    Int,
    Bool,
    /// Handle to an externally owned string blob.
    StringProperty,
    /// Handle to an externally owned binary blob.
    DataProperty,
}

/// Pure function from normalized `[0, 1]` to the domain value.
///
/// The clip to `[min, max]` is always applied after the mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterScale {
    /// `domain = min + normalized * (max - min)`
    Linear,

    /// Log-domain interpolation between `min` and `max`. Requires `min > 0`;
    /// falls back to linear otherwise.
    Logarithmic,

    /// `domain = min + normalized^curve * (max - min)`. `curve > 1` gives
    /// more resolution at the low end.
    Exponential { curve: f32 },

    /// Arbitrary normalized→domain function. The inverse mapping is not
    /// known, so `normalized_from_domain` falls back to clipped linear; the
    /// store keeps the authoritative normalized value alongside the domain
    /// value, so round trips through the store stay exact.
    Custom(fn(f32) -> f32),
}

impl ParameterScale {
    /// Map a normalized value to the domain, clipped to `[min, max]`.
    #[inline]
    pub fn domain_from_normalized(&self, min: f32, max: f32, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        let range = max - min;
        let value = match *self {
            ParameterScale::Linear => min + normalized * range,
            ParameterScale::Logarithmic => {
                if min <= 0.0 {
                    min + normalized * range
                } else {
                    let log_min = min.ln();
                    let log_max = max.ln();
                    (log_min + normalized * (log_max - log_min)).exp()
                }
            }
            ParameterScale::Exponential { curve } => {
                let shaped = if curve <= 0.0 || curve == 1.0 {
                    normalized
                } else {
                    normalized.powf(curve)
                };
                min + shaped * range
            }
            ParameterScale::Custom(f) => f(normalized),
        };
        value.clamp(min.min(max), max.max(min))
    }

    /// Inverse of [`domain_from_normalized`](Self::domain_from_normalized).
    #[inline]
    pub fn normalized_from_domain(&self, min: f32, max: f32, value: f32) -> f32 {
        let value = value.clamp(min.min(max), max.max(min));
        let range = max - min;
        if range.abs() <= f32::EPSILON {
            return 0.0;
        }
        match *self {
            ParameterScale::Linear | ParameterScale::Custom(_) => (value - min) / range,
            ParameterScale::Logarithmic => {
                if min <= 0.0 {
                    (value - min) / range
                } else {
                    let log_min = min.ln();
                    let log_max = max.ln();
                    (value.ln() - log_min) / (log_max - log_min)
                }
            }
            ParameterScale::Exponential { curve } => {
                let linear = (value - min) / range;
                if curve <= 0.0 || curve == 1.0 {
                    linear
                } else {
                    linear.powf(1.0 / curve)
                }
            }
        }
    }
}

impl Default for ParameterScale {
    fn default() -> Self {
        ParameterScale::Linear
    }
}

/// Immutable description of one parameter.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub id: ParamId,
    /// Unique within the owning processor.
    pub name: String,
    /// Display name.
    pub label: String,
    /// Unit suffix for formatted display values.
    pub unit: String,
    pub kind: ParameterKind,
    pub min: f32,
    pub max: f32,
    pub default_normalized: f32,
    pub scale: ParameterScale,
}

/// One parameter's value slot.
///
/// Numeric kinds keep the domain and normalized values side by side so the
/// audio thread writes both in one event and readers pick either without a
/// conversion. Stores are `Release`, loads `Acquire`; the audio thread is
/// the single writer. Padded to a cache line so a cell being automated
/// never shares a line with a neighbor being polled from a UI thread.
#[repr(align(64))]
enum ValueCell {
    Float {
        domain: AtomicF32,
        normalized: AtomicF32,
    },
    Int {
        domain: AtomicI32,
        normalized: AtomicF32,
    },
    Bool {
        value: AtomicBool,
    },
    Str {
        value: ArcSwapOption<String>,
    },
    Data {
        value: ArcSwapOption<Vec<u8>>,
    },
}

/// Builds a [`ParameterStore`] during processor construction.
#[derive(Default)]
pub struct ParameterStoreBuilder {
    descriptors: Vec<ParameterDescriptor>,
    cells: Vec<ValueCell>,
    by_name: HashMap<String, ParamHandle>,
}

impl ParameterStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &mut self,
        descriptor: ParameterDescriptor,
        cell: ValueCell,
    ) -> crate::Result<ParamHandle> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(crate::Error::DuplicateParameterName(descriptor.name));
        }
        let handle = self.descriptors.len();
        self.by_name.insert(descriptor.name.clone(), handle);
        self.descriptors.push(descriptor);
        self.cells.push(cell);
        Ok(handle)
    }

    pub fn register_float_parameter(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default_normalized: f32,
        min: f32,
        max: f32,
        scale: ParameterScale,
    ) -> crate::Result<ParamHandle> {
        let default_normalized = default_normalized.clamp(0.0, 1.0);
        let domain = scale.domain_from_normalized(min, max, default_normalized);
        self.register(
            ParameterDescriptor {
                id: next_object_id(),
                name: name.to_owned(),
                label: label.to_owned(),
                unit: unit.to_owned(),
                kind: ParameterKind::Float,
                min,
                max,
                default_normalized,
                scale,
            },
            ValueCell::Float {
                domain: AtomicF32::new(domain),
                normalized: AtomicF32::new(default_normalized),
            },
        )
    }

    pub fn register_int_parameter(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default_normalized: f32,
        min: i32,
        max: i32,
    ) -> crate::Result<ParamHandle> {
        let default_normalized = default_normalized.clamp(0.0, 1.0);
        let scale = ParameterScale::Linear;
        let domain = scale
            .domain_from_normalized(min as f32, max as f32, default_normalized)
            .round() as i32;
        self.register(
            ParameterDescriptor {
                id: next_object_id(),
                name: name.to_owned(),
                label: label.to_owned(),
                unit: unit.to_owned(),
                kind: ParameterKind::Int,
                min: min as f32,
                max: max as f32,
                default_normalized,
                scale,
            },
            ValueCell::Int {
                domain: AtomicI32::new(domain),
                normalized: AtomicF32::new(default_normalized),
            },
        )
    }

    pub fn register_bool_parameter(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default: bool,
    ) -> crate::Result<ParamHandle> {
        self.register(
            ParameterDescriptor {
                id: next_object_id(),
                name: name.to_owned(),
                label: label.to_owned(),
                unit: unit.to_owned(),
                kind: ParameterKind::Bool,
                min: 0.0,
                max: 1.0,
                default_normalized: if default { 1.0 } else { 0.0 },
                scale: ParameterScale::Linear,
            },
            ValueCell::Bool {
                value: AtomicBool::new(default),
            },
        )
    }

    pub fn register_string_property(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
    ) -> crate::Result<ParamHandle> {
        self.register(
            ParameterDescriptor {
                id: next_object_id(),
                name: name.to_owned(),
                label: label.to_owned(),
                unit: unit.to_owned(),
                kind: ParameterKind::StringProperty,
                min: 0.0,
                max: 1.0,
                default_normalized: 0.0,
                scale: ParameterScale::Linear,
            },
            ValueCell::Str {
                value: ArcSwapOption::empty(),
            },
        )
    }

    pub fn register_data_property(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
    ) -> crate::Result<ParamHandle> {
        self.register(
            ParameterDescriptor {
                id: next_object_id(),
                name: name.to_owned(),
                label: label.to_owned(),
                unit: unit.to_owned(),
                kind: ParameterKind::DataProperty,
                min: 0.0,
                max: 1.0,
                default_normalized: 0.0,
                scale: ParameterScale::Linear,
            },
            ValueCell::Data {
                value: ArcSwapOption::empty(),
            },
        )
    }

    /// Freeze the parameter set.
    pub fn build(self) -> ParameterStore {
        let by_id = self
            .descriptors
            .iter()
            .enumerate()
            .map(|(idx, d)| (d.id, idx))
            .collect();
        ParameterStore {
            descriptors: self.descriptors,
            cells: self.cells,
            by_name: self.by_name,
            by_id,
        }
    }
}

/// Frozen parameter set of one processor.
///
/// Numeric writes come only from the audio thread; reads are wait-free from
/// any thread.
pub struct ParameterStore {
    descriptors: Vec<ParameterDescriptor>,
    cells: Vec<ValueCell>,
    by_name: HashMap<String, ParamHandle>,
    by_id: HashMap<ParamId, ParamHandle>,
}

impl ParameterStore {
    pub fn empty() -> Self {
        ParameterStoreBuilder::new().build()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, handle: ParamHandle) -> Option<&ParameterDescriptor> {
        self.descriptors.get(handle)
    }

    /// Look up a handle by parameter name.
    pub fn handle_by_name(&self, name: &str) -> Option<ParamHandle> {
        self.by_name.get(name).copied()
    }

    /// Look up a handle by global parameter id. Wait-free after freeze.
    #[inline]
    pub fn handle_by_id(&self, id: ParamId) -> Option<ParamHandle> {
        self.by_id.get(&id).copied()
    }

    /// Current domain value. Bool reads as 0/1, properties as 0.
    #[inline]
    pub fn value(&self, handle: ParamHandle) -> f32 {
        match &self.cells[handle] {
            ValueCell::Float { domain, .. } => domain.load(Ordering::Acquire),
            ValueCell::Int { domain, .. } => domain.load(Ordering::Acquire) as f32,
            ValueCell::Bool { value } => {
                if value.load(Ordering::Acquire) {
                    1.0
                } else {
                    0.0
                }
            }
            ValueCell::Str { .. } | ValueCell::Data { .. } => 0.0,
        }
    }

    /// Current normalized value in `[0, 1]`.
    #[inline]
    pub fn value_normalized(&self, handle: ParamHandle) -> f32 {
        match &self.cells[handle] {
            ValueCell::Float { normalized, .. } | ValueCell::Int { normalized, .. } => {
                normalized.load(Ordering::Acquire)
            }
            ValueCell::Bool { value } => {
                if value.load(Ordering::Acquire) {
                    1.0
                } else {
                    0.0
                }
            }
            ValueCell::Str { .. } | ValueCell::Data { .. } => 0.0,
        }
    }

    /// Unit-suffixed display string, e.g. `"50.00 %"`. Not RT-safe.
    pub fn value_formatted(&self, handle: ParamHandle) -> String {
        let descriptor = &self.descriptors[handle];
        let value = self.value(handle);
        if descriptor.unit.is_empty() {
            format!("{:.2}", value)
        } else {
            format!("{:.2} {}", value, descriptor.unit)
        }
    }

    #[inline]
    pub fn bool_value(&self, handle: ParamHandle) -> bool {
        matches!(
            &self.cells[handle],
            ValueCell::Bool { value } if value.load(Ordering::Acquire)
        )
    }

    #[inline]
    pub fn int_value(&self, handle: ParamHandle) -> i32 {
        match &self.cells[handle] {
            ValueCell::Int { domain, .. } => domain.load(Ordering::Acquire),
            _ => 0,
        }
    }

    /// Set from a normalized value, updating the domain cell through the
    /// parameter's scale. Returns the resulting domain value.
    ///
    /// Audio thread only. Wait-free.
    #[inline]
    pub fn set_normalized(&self, handle: ParamHandle, value: f32) -> f32 {
        let descriptor = &self.descriptors[handle];
        let value = value.clamp(0.0, 1.0);
        match &self.cells[handle] {
            ValueCell::Float { domain, normalized } => {
                let d = descriptor
                    .scale
                    .domain_from_normalized(descriptor.min, descriptor.max, value);
                normalized.store(value, Ordering::Release);
                domain.store(d, Ordering::Release);
                d
            }
            ValueCell::Int { domain, normalized } => {
                let d = descriptor
                    .scale
                    .domain_from_normalized(descriptor.min, descriptor.max, value)
                    .round();
                normalized.store(value, Ordering::Release);
                domain.store(d as i32, Ordering::Release);
                d
            }
            ValueCell::Bool { value: cell } => {
                let on = value >= 0.5;
                cell.store(on, Ordering::Release);
                if on {
                    1.0
                } else {
                    0.0
                }
            }
            ValueCell::Str { .. } | ValueCell::Data { .. } => 0.0,
        }
    }

    /// Set from a domain value; the normalized cell is derived through the
    /// inverse scale. Returns the clipped domain value.
    ///
    /// Audio thread only. Wait-free.
    #[inline]
    pub fn set_domain(&self, handle: ParamHandle, value: f32) -> f32 {
        let descriptor = &self.descriptors[handle];
        let normalized = descriptor
            .scale
            .normalized_from_domain(descriptor.min, descriptor.max, value);
        self.set_normalized(handle, normalized)
    }

    /// Current string property value.
    pub fn string_value(&self, handle: ParamHandle) -> Option<Arc<String>> {
        match &self.cells[handle] {
            ValueCell::Str { value } => value.load_full(),
            _ => None,
        }
    }

    /// Swap in a new string blob, returning the old one so the caller can
    /// route it off the audio thread before it is dropped.
    #[inline]
    pub fn set_string(&self, handle: ParamHandle, value: Arc<String>) -> Option<Arc<String>> {
        match &self.cells[handle] {
            ValueCell::Str { value: cell } => cell.swap(Some(value)),
            _ => None,
        }
    }

    /// Current data property value.
    pub fn data_value(&self, handle: ParamHandle) -> Option<Arc<Vec<u8>>> {
        match &self.cells[handle] {
            ValueCell::Data { value } => value.load_full(),
            _ => None,
        }
    }

    /// Swap in a new data blob, returning the old one.
    #[inline]
    pub fn set_data(&self, handle: ParamHandle, value: Arc<Vec<u8>>) -> Option<Arc<Vec<u8>>> {
        match &self.cells[handle] {
            ValueCell::Data { value: cell } => cell.swap(Some(value)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("parameters", &self.descriptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.001
    }

    #[test]
    fn test_linear_roundtrip() {
        let scale = ParameterScale::Linear;
        assert!(approx_eq(scale.domain_from_normalized(0.0, 100.0, 0.5), 50.0));
        assert!(approx_eq(scale.normalized_from_domain(0.0, 100.0, 50.0), 0.5));

        for value in [0.0, 12.5, 50.0, 99.0, 100.0] {
            let n = scale.normalized_from_domain(0.0, 100.0, value);
            assert!(approx_eq(scale.domain_from_normalized(0.0, 100.0, n), value));
        }
    }

    #[test]
    fn test_logarithmic_midpoint_is_geometric_mean() {
        let scale = ParameterScale::Logarithmic;
        let mid = scale.domain_from_normalized(20.0, 20000.0, 0.5);
        let expected = (20.0f32 * 20000.0).sqrt();
        assert!((mid - expected).abs() / expected < 0.001);
        assert!(approx_eq(scale.domain_from_normalized(20.0, 20000.0, 0.0), 20.0));
        assert!(approx_eq(
            scale.domain_from_normalized(20.0, 20000.0, 1.0),
            20000.0
        ));
    }

    #[test]
    fn test_exponential_curve() {
        let scale = ParameterScale::Exponential { curve: 2.0 };
        assert!(approx_eq(scale.domain_from_normalized(0.0, 1.0, 0.5), 0.25));
        assert!(approx_eq(scale.normalized_from_domain(0.0, 1.0, 0.25), 0.5));
    }

    #[test]
    fn test_custom_scale_clips_to_range() {
        fn squared_times_ten(n: f32) -> f32 {
            n * n * 10.0
        }
        let scale = ParameterScale::Custom(squared_times_ten);
        assert!(approx_eq(scale.domain_from_normalized(0.0, 5.0, 0.5), 2.5));
        // Mapping exceeds max, gets clipped
        assert!(approx_eq(scale.domain_from_normalized(0.0, 5.0, 1.0), 5.0));
    }

    #[test]
    fn test_normalized_input_clipped() {
        let scale = ParameterScale::Linear;
        assert!(approx_eq(scale.domain_from_normalized(0.0, 10.0, -0.5), 0.0));
        assert!(approx_eq(scale.domain_from_normalized(0.0, 10.0, 1.5), 10.0));
    }

    #[test]
    fn test_register_and_read() {
        let mut builder = ParameterStoreBuilder::new();
        let mix = builder
            .register_float_parameter("mix", "Mix", "%", 0.5, 0.0, 100.0, ParameterScale::Linear)
            .unwrap();
        let store = builder.build();

        assert!(approx_eq(store.value(mix), 50.0));
        assert!(approx_eq(store.value_normalized(mix), 0.5));
        assert_eq!(store.value_formatted(mix), "50.00 %");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut builder = ParameterStoreBuilder::new();
        builder
            .register_float_parameter("gain", "Gain", "", 1.0, 0.0, 2.0, ParameterScale::Linear)
            .unwrap();
        let result = builder.register_bool_parameter("gain", "Gain", "", false);
        assert!(matches!(result, Err(crate::Error::DuplicateParameterName(_))));
    }

    #[test]
    fn test_set_normalized_updates_domain() {
        let mut builder = ParameterStoreBuilder::new();
        let handle = builder
            .register_float_parameter("mix", "Mix", "", 0.0, 0.0, 1.0, ParameterScale::Linear)
            .unwrap();
        let store = builder.build();

        let domain = store.set_normalized(handle, 0.75);
        assert!(approx_eq(domain, 0.75));
        assert!(approx_eq(store.value(handle), 0.75));
    }

    #[test]
    fn test_set_domain_updates_normalized() {
        let mut builder = ParameterStoreBuilder::new();
        let handle = builder
            .register_float_parameter("level", "Level", "dB", 0.0, -60.0, 12.0, ParameterScale::Linear)
            .unwrap();
        let store = builder.build();

        store.set_domain(handle, -24.0);
        assert!(approx_eq(store.value(handle), -24.0));
        assert!(approx_eq(store.value_normalized(handle), 36.0 / 72.0));
    }

    #[test]
    fn test_int_parameter_rounds() {
        let mut builder = ParameterStoreBuilder::new();
        let steps = builder
            .register_int_parameter("steps", "Steps", "", 0.0, 0, 10)
            .unwrap();
        let store = builder.build();

        store.set_normalized(steps, 0.34);
        assert_eq!(store.int_value(steps), 3);
    }

    #[test]
    fn test_bool_parameter_threshold() {
        let mut builder = ParameterStoreBuilder::new();
        let on = builder
            .register_bool_parameter("enabled", "Enabled", "", false)
            .unwrap();
        let store = builder.build();

        store.set_normalized(on, 0.49);
        assert!(!store.bool_value(on));
        store.set_normalized(on, 0.5);
        assert!(store.bool_value(on));
    }

    #[test]
    fn test_string_property_swap_returns_old() {
        let mut builder = ParameterStoreBuilder::new();
        let preset = builder
            .register_string_property("preset", "Preset", "")
            .unwrap();
        let store = builder.build();

        assert!(store.string_value(preset).is_none());
        let old = store.set_string(preset, Arc::new("warm pad".to_owned()));
        assert!(old.is_none());

        let old = store.set_string(preset, Arc::new("bright keys".to_owned()));
        assert_eq!(old.unwrap().as_str(), "warm pad");
        assert_eq!(store.string_value(preset).unwrap().as_str(), "bright keys");
    }

    #[test]
    fn test_handle_lookup() {
        let mut builder = ParameterStoreBuilder::new();
        let a = builder
            .register_float_parameter("a", "A", "", 0.0, 0.0, 1.0, ParameterScale::Linear)
            .unwrap();
        let b = builder
            .register_float_parameter("b", "B", "", 0.0, 0.0, 1.0, ParameterScale::Linear)
            .unwrap();
        let store = builder.build();

        assert_eq!(store.handle_by_name("a"), Some(a));
        assert_eq!(store.handle_by_name("missing"), None);

        let id_b = store.descriptor(b).unwrap().id;
        assert_eq!(store.handle_by_id(id_b), Some(b));
        // Ids are globally unique and never zero
        assert_ne!(store.descriptor(a).unwrap().id, id_b);
        assert_ne!(store.descriptor(a).unwrap().id, 0);
    }
}
