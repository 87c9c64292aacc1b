use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssemblerError>;

/// Defects raised while building metadata or finishing a method body.
///
/// Every variant is fatal for the generation run. Instruction indices refer to
/// positions in the body's program order at the time the defect was found.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssemblerError {
    /// Generic instantiation with the wrong number of type arguments.
    #[error("generic arity mismatch on '{generic}': expected {expected} type argument(s), got {actual}")]
    Arity {
        generic: String,
        expected: usize,
        actual: usize,
    },

    /// A type argument does not satisfy a formal parameter's constraint.
    #[error(
        "type argument {index} of '{generic}' violates constraint '{constraint}' on '{parameter}': got '{argument}'"
    )]
    ConstraintViolation {
        generic: String,
        index: usize,
        parameter: String,
        constraint: String,
        argument: String,
    },

    /// A member's owner and its declaring type's collection disagree, or a
    /// member was removed from a type that does not own it.
    #[error("ownership error on '{member}': {reason}")]
    Ownership { member: String, reason: String },

    /// A placeholder label could not be eliminated by branch resolution.
    #[error("dangling label at instruction {index}: {reason}")]
    DanglingLabel { index: usize, reason: String },

    #[error(
        "stack underflow at instruction {index} ({opcode}): not enough values to pop, needed {needed}, have {available}"
    )]
    StackUnderflow {
        index: usize,
        opcode: String,
        needed: u32,
        available: u32,
    },

    /// Underflow on a call-shaped instruction. Usually a missing argument push.
    #[error(
        "call arity error at instruction {index} ({opcode} {callee}): callee takes {needed} stack value(s) but only {available} available"
    )]
    CallArity {
        index: usize,
        opcode: String,
        callee: String,
        needed: u32,
        available: u32,
    },

    #[error("instruction {index} ({opcode}) requires an empty stack, found height {height}")]
    EmptyStackRequired {
        index: usize,
        opcode: String,
        height: u32,
    },

    /// Two control-flow paths reach the same instruction with different heights.
    #[error("stack height mismatch at instruction {index}: recorded {recorded}, incoming {incoming}")]
    StackHeightMismatch {
        index: usize,
        recorded: u32,
        incoming: u32,
    },

    #[error("label {label} belongs to a different instruction stream")]
    ForeignLabel { label: u32 },

    #[error("instruction {label} is already placed in the stream")]
    AlreadyPlaced { label: u32 },

    #[error("opcode '{opcode}' expects a {expected} operand, got {found}")]
    OperandMismatch {
        opcode: String,
        expected: String,
        found: String,
    },

    #[error("instruction {index} references local '{local}' which was never added to the body")]
    UnregisteredLocal { index: usize, local: String },

    /// An argument slot past the end of the method's argument list.
    #[error("instruction {index} references argument {slot} but the method takes {count} argument(s)")]
    ArgumentOutOfRange { index: usize, slot: u32, count: u32 },

    /// A signature whose argument slots do not fit the 16-bit slot encoding.
    #[error("method signature has {count} argument slot(s), more than {max} can be encoded")]
    TooManyParameters { count: u32, max: u16 },

    #[error("evaluation stack reaches height {height}, more than {max} can be encoded")]
    StackTooDeep { height: u32, max: u16 },

    #[error("method body is finalized and can no longer be modified")]
    BodyFinalized,

    #[error("unknown {kind} id {id}")]
    UnknownMember { kind: &'static str, id: u32 },

    #[error("in method '{method}': {source}")]
    InMethod {
        method: String,
        #[source]
        source: Box<AssemblerError>,
    },
}

impl AssemblerError {
    pub fn ownership(member: impl Into<String>, reason: impl Into<String>) -> Self {
        AssemblerError::Ownership {
            member: member.into(),
            reason: reason.into(),
        }
    }

    pub fn dangling(index: usize, reason: impl Into<String>) -> Self {
        AssemblerError::DanglingLabel {
            index,
            reason: reason.into(),
        }
    }

    pub fn operand_mismatch(
        opcode: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        AssemblerError::OperandMismatch {
            opcode: opcode.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Attach the declaring member's name. Already-wrapped errors keep their
    /// innermost method.
    pub fn in_method(self, method: impl Into<String>) -> Self {
        match self {
            AssemblerError::InMethod { .. } => self,
            other => AssemblerError::InMethod {
                method: method.into(),
                source: Box::new(other),
            },
        }
    }

    /// The error without any method context.
    pub fn root(&self) -> &AssemblerError {
        match self {
            AssemblerError::InMethod { source, .. } => source.root(),
            other => other,
        }
    }

    /// Instruction index the defect refers to, if it has one.
    pub fn index(&self) -> Option<usize> {
        match self.root() {
            AssemblerError::DanglingLabel { index, .. }
            | AssemblerError::StackUnderflow { index, .. }
            | AssemblerError::CallArity { index, .. }
            | AssemblerError::EmptyStackRequired { index, .. }
            | AssemblerError::StackHeightMismatch { index, .. }
            | AssemblerError::UnregisteredLocal { index, .. }
            | AssemblerError::ArgumentOutOfRange { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underflow_display() {
        let err = AssemblerError::StackUnderflow {
            index: 0,
            opcode: "add".to_string(),
            needed: 2,
            available: 0,
        };

        let msg = err.to_string();
        assert!(msg.contains("stack underflow"));
        assert!(msg.contains("instruction 0"));
        assert!(msg.contains("not enough values to pop"));
    }

    #[test]
    fn test_call_arity_display_names_callee() {
        let err = AssemblerError::CallArity {
            index: 3,
            opcode: "call".to_string(),
            callee: "System.Console::WriteLine".to_string(),
            needed: 1,
            available: 0,
        };

        let msg = err.to_string();
        assert!(msg.contains("call arity"));
        assert!(msg.contains("WriteLine"));
    }

    #[test]
    fn test_in_method_wraps_once() {
        let err = AssemblerError::dangling(4, "label at end of body")
            .in_method("Hooks.PlayerHooks::Update")
            .in_method("outer");

        let msg = err.to_string();
        assert!(msg.contains("Hooks.PlayerHooks::Update"));
        assert!(!msg.contains("outer"));
        assert_eq!(err.index(), Some(4));
        assert!(matches!(err.root(), AssemblerError::DanglingLabel { .. }));
    }

    #[test]
    fn test_index_absent_for_metadata_errors() {
        let err = AssemblerError::ownership("Foo::bar", "not owned");
        assert_eq!(err.index(), None);
        assert!(err.to_string().contains("Foo::bar"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = AssemblerError::BodyFinalized;
        let _: &dyn std::error::Error = &err;
    }
}
