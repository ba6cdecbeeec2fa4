//! Stimulus object capability interface
//!
//! A stimulus object is one selectable, flashable on-screen target. The host
//! application owns the objects and implements this trait; the engine only
//! holds non-owning references and drives the capabilities below. All methods
//! take `&self` so implementations are expected to use interior mutability.

use std::sync::Weak;

/// Stable identifier for a stimulus object, assigned lazily on first
/// population and carried by the entity for its lifetime.
pub type ObjectId = u32;

/// Capability set of one selectable target.
///
/// The engine never depends on the concrete visual effect, only on these
/// methods being idempotent and observable.
pub trait StimulusObject: Send + Sync {
    /// Begin visual emphasis. Returns the onset timestamp in microseconds
    /// since the Unix epoch.
    fn start_stimulus(&self) -> u64;

    /// End visual emphasis.
    fn stop_stimulus(&self);

    /// Highlight this object as the current training target.
    fn mark_training_target(&self);

    /// Remove the training-target highlight.
    fn unmark_training_target(&self);

    /// Report a selection on this object.
    fn select(&self);

    /// Whether this object participates in selection pools.
    fn is_selectable(&self) -> bool {
        true
    }

    /// The object's stable identifier, or `None` if one has not been
    /// assigned yet.
    fn object_id(&self) -> Option<ObjectId>;

    /// Install the object's stable identifier. Called at most once per
    /// entity lifetime, by the pool during population.
    fn assign_object_id(&self, id: ObjectId);

    /// Projected screen position as seen from the viewpoint, or `None` when
    /// the object is currently off-screen. Context-aware flash plans use
    /// this both as the visibility filter and as the separation metric.
    fn screen_position(&self) -> Option<[f32; 2]> {
        None
    }
}

/// Non-owning handle to a host-owned stimulus object.
pub type ObjectHandle = Weak<dyn StimulusObject>;

/// Current timestamp in microseconds since the Unix epoch.
pub fn timestamp_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
