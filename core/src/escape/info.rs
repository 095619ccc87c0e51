use std::fmt;

use serde::Serialize;

use crate::ast::Position;
use crate::config::MAX_STACK_OBJECT_SIZE;
use crate::dfg::{NodeId, ValueType};

use super::EscapeState;

/// Why an allocation's escape state was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeReason {
    StoredToHeap,
    StoredToArray,
    Returned,
    PassedToUnknown,
    CapturedByClosure,
    ThrownAsException,
    AssignedToGlobal,
    /// Raised by fixpoint propagation from a value it flows into.
    FlowsToEscapingValue,
}

impl EscapeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EscapeReason::StoredToHeap => "stored_to_heap",
            EscapeReason::StoredToArray => "stored_to_array",
            EscapeReason::Returned => "returned",
            EscapeReason::PassedToUnknown => "passed_to_unknown",
            EscapeReason::CapturedByClosure => "captured_by_closure",
            EscapeReason::ThrownAsException => "thrown_as_exception",
            EscapeReason::AssignedToGlobal => "assigned_to_global",
            EscapeReason::FlowsToEscapingValue => "flows_to_escaping_value",
        }
    }
}

impl fmt::Display for EscapeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscapePoint {
    pub loc: Option<Position>,
    pub reason: EscapeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Object,
    Array,
    Closure,
    String,
    Unknown,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Object => "object",
            ObjectType::Array => "array",
            ObjectType::Closure => "closure",
            ObjectType::String => "string",
            ObjectType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field of a decomposable allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarField {
    pub name: String,
    pub ty: ValueType,
    /// Index of the field within its allocation, in discovery order.
    pub slot: u32,
    /// Byte offset inside the allocation (8 bytes per field).
    pub offset: u32,
}

/// Escape record of one allocation site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscapeInfo {
    pub node: NodeId,
    pub state: EscapeState,
    pub trail: Vec<EscapePoint>,
    pub can_scalar_replace: bool,
    pub fields: Vec<ScalarField>,
    pub object_type: ObjectType,
    /// Class name for `new C(...)` sites.
    pub class_name: Option<String>,
    pub estimated_size: u32,
    /// `false` when `estimated_size` came from the per-type default.
    pub size_is_explicit: bool,
    pub loc: Option<Position>,
}

impl EscapeInfo {
    pub fn new(node: NodeId, object_type: ObjectType, estimated_size: u32, size_is_explicit: bool) -> Self {
        Self {
            node,
            state: EscapeState::NoEscape,
            trail: Vec::new(),
            can_scalar_replace: false,
            fields: Vec::new(),
            object_type,
            class_name: None,
            estimated_size,
            size_is_explicit,
            loc: None,
        }
    }

    /// Raise the state to at least `state`, recording `reason` when it grows.
    pub fn escalate(&mut self, state: EscapeState, reason: EscapeReason, loc: Option<Position>) -> bool {
        let merged = self.state.merge(state);
        if merged == self.state {
            return false;
        }
        self.state = merged;
        self.trail.push(EscapePoint { loc, reason });
        true
    }

    /// Record a field access, keeping the first occurrence of each name.
    pub fn record_field(&mut self, name: &str, ty: ValueType) {
        if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
            if field.ty == ValueType::Unknown {
                field.ty = ty;
            }
            return;
        }
        let slot = self.fields.len() as u32;
        self.fields.push(ScalarField {
            name: name.to_string(),
            ty,
            slot,
            offset: slot * 8,
        });
    }

    pub fn reasons(&self) -> impl Iterator<Item = EscapeReason> + '_ {
        self.trail.iter().map(|p| p.reason)
    }

    /// Escape and size preconditions for a stack slot when objects may be at
    /// most `max_object_size` bytes. The frame budget is not checked here.
    pub fn fits_on_stack(&self, max_object_size: u32) -> bool {
        self.state == EscapeState::NoEscape && self.estimated_size > 0 && self.estimated_size <= max_object_size
    }

    /// [`Self::fits_on_stack`] under the default [`MAX_STACK_OBJECT_SIZE`].
    /// Placement with a custom config uses `fits_on_stack(config.max_object_size)`.
    pub fn is_stack_allocatable(&self) -> bool {
        self.fits_on_stack(MAX_STACK_OBJECT_SIZE)
    }

    pub fn is_scalar_replaceable(&self) -> bool {
        self.state == EscapeState::NoEscape && self.can_scalar_replace && !self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size: u32) -> EscapeInfo {
        EscapeInfo::new(NodeId::new(0), ObjectType::Object, size, true)
    }

    #[test]
    fn escalate_records_only_increases() {
        let mut info = info(64);
        assert!(info.escalate(EscapeState::GlobalEscape, EscapeReason::Returned, None));
        assert!(!info.escalate(EscapeState::ArgEscape, EscapeReason::PassedToUnknown, None));
        assert_eq!(info.state, EscapeState::GlobalEscape);
        assert_eq!(info.reasons().collect::<Vec<_>>(), vec![EscapeReason::Returned]);
    }

    #[test]
    fn stack_allocatable_requires_no_escape_and_bounded_size() {
        assert!(info(64).is_stack_allocatable());
        assert!(info(256).is_stack_allocatable());
        assert!(!info(257).is_stack_allocatable());
        assert!(!info(0).is_stack_allocatable());

        let mut escaped = info(64);
        escaped.escalate(EscapeState::ArgEscape, EscapeReason::PassedToUnknown, None);
        assert!(!escaped.is_stack_allocatable());
        assert!(!escaped.fits_on_stack(u32::MAX));
    }

    #[test]
    fn fits_on_stack_honours_custom_object_limit() {
        assert!(!info(64).fits_on_stack(32));
        assert!(info(32).fits_on_stack(32));
        assert!(info(300).fits_on_stack(512));
        assert!(!info(300).is_stack_allocatable());
    }

    #[test]
    fn fields_are_deduplicated_with_sequential_offsets() {
        let mut info = info(64);
        info.record_field("x", ValueType::Unknown);
        info.record_field("y", ValueType::Int);
        info.record_field("x", ValueType::Float);
        assert_eq!(info.fields.len(), 2);
        assert_eq!(info.fields[0].ty, ValueType::Float);
        assert_eq!((info.fields[1].slot, info.fields[1].offset), (1, 8));
    }

    #[test]
    fn scalar_replaceable_needs_flag_and_fields() {
        let mut info = info(64);
        info.can_scalar_replace = true;
        assert!(!info.is_scalar_replaceable());
        info.record_field("x", ValueType::Int);
        assert!(info.is_scalar_replaceable());
    }
}
