//! Instruction set definition.
//!
//! Bytecode is a flat vector of signed integers: an opcode followed by its
//! operands, each one integer wide. Opcode values are dense and assigned in
//! canonical table order, so the numbering below is part of the bytecode
//! format.

/// The instruction adjusts the instruction pointer itself.
pub const TAG_CTRL_FLOW: u8 = 1;
/// The instruction hands a different frame back to the dispatcher.
pub const TAG_CTX_SWITCH: u8 = 2;

/// Declare the instruction table in one place: opcode values, mnemonics,
/// operand counts and dispatch tags.
macro_rules! instruction_set {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal, operands $operands:literal, tags $tags:expr;
        )+
    ) => {
        /// Operation codes understood by the virtual machine.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(i64)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )+
        }

        impl Opcode {
            /// Decode a bytecode integer into an opcode.
            pub fn decode(code: i64) -> Option<Opcode> {
                match code {
                    $( $opcode => Some(Opcode::$name), )+
                    _ => None,
                }
            }

            /// Number of integer operands following the opcode.
            pub const fn operand_count(self) -> usize {
                match self {
                    $( Opcode::$name => $operands, )+
                }
            }

            /// Total instruction width in bytecode integers.
            pub const fn length(self) -> usize {
                self.operand_count() + 1
            }

            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )+
                }
            }

            const fn tags(self) -> u8 {
                match self {
                    $( Opcode::$name => $tags, )+
                }
            }

            /// The instruction moves `ip` itself; the dispatcher must not.
            pub const fn is_ctrl_flow(self) -> bool {
                self.tags() & TAG_CTRL_FLOW != 0
            }

            /// The instruction returns the frame to continue executing.
            pub const fn is_ctx_switch(self) -> bool {
                self.tags() & TAG_CTX_SWITCH != 0
            }

            #[inline]
            pub const fn encode(self) -> i64 {
                self as i64
            }
        }
    };
}

instruction_set! {
    /// Return from a procedure, handing the top of stack to the parent frame.
    Ret = 0, "ret", operands 0, tags TAG_CTRL_FLOW | TAG_CTX_SWITCH;
    /// Call the procedure on top of the stack with `argc` arguments below it.
    Call = 1, "call", operands 1, tags TAG_CTRL_FLOW | TAG_CTX_SWITCH;
    /// Like `call`, but the new frame replaces the current one.
    TailCall = 2, "tail_call", operands 1, tags TAG_CTRL_FLOW | TAG_CTX_SWITCH;
    /// Capture the current frame chain and call the procedure on top of
    /// the stack with the continuation as its single argument.
    CallCc = 3, "call_cc", operands 0, tags TAG_CTRL_FLOW | TAG_CTX_SWITCH;
    Pop = 4, "pop", operands 0, tags 0;
    PushLocal = 5, "push_local", operands 1, tags 0;
    SetLocal = 6, "set_local", operands 1, tags 0;
    /// Local access in a lexical parent; the first operand is the number
    /// of parent hops.
    PushLocalDepth = 7, "push_local_depth", operands 2, tags 0;
    SetLocalDepth = 8, "set_local_depth", operands 2, tags 0;
    /// Push an entry of the form's literal table.
    PushLiteral = 9, "push_literal", operands 1, tags 0;
    Push0 = 10, "push_0", operands 0, tags 0;
    Push1 = 11, "push_1", operands 0, tags 0;
    PushNil = 12, "push_nil", operands 0, tags 0;
    PushTrue = 13, "push_true", operands 0, tags 0;
    PushFalse = 14, "push_false", operands 0, tags 0;
    Dup = 15, "dup", operands 0, tags 0;
    /// Unconditional jump to an absolute instruction pointer.
    Goto = 16, "goto", operands 1, tags TAG_CTRL_FLOW;
    GotoIfFalse = 17, "goto_if_false", operands 1, tags TAG_CTRL_FLOW;
    GotoIfNotFalse = 18, "goto_if_not_false", operands 1, tags TAG_CTRL_FLOW;
    /// Stamp the current environment as the lexical parent of the
    /// procedure on top of the stack, turning the stored template into a
    /// live closure.
    FixLexical = 19, "fix_lexical", operands 0, tags 0;
    FixLexicalPop = 20, "fix_lexical_pop", operands 0, tags 0;
    FixLexicalDepth = 21, "fix_lexical_depth", operands 1, tags 0;
    /// Evaluate a form carrying its own lexical parent and push the result.
    DynamicEval = 22, "dynamic_eval", operands 0, tags 0;
    /// Assign through the lexical parent of a popped form.
    DynamicSetLocal = 23, "dynamic_set_local", operands 1, tags 0;
    DynamicSetLocalDepth = 24, "dynamic_set_local_depth", operands 2, tags 0;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_roundtrip() {
        for code in 0..25 {
            let op = Opcode::decode(code).expect("dense opcode numbering");
            assert_eq!(op.encode(), code);
        }
        assert_eq!(Opcode::decode(25), None);
        assert_eq!(Opcode::decode(-1), None);
    }

    #[test]
    fn test_lengths() {
        assert_eq!(Opcode::Ret.length(), 1);
        assert_eq!(Opcode::Call.length(), 2);
        assert_eq!(Opcode::PushLocalDepth.length(), 3);
        assert_eq!(Opcode::Goto.length(), 2);
        assert_eq!(Opcode::DynamicSetLocalDepth.length(), 3);
    }

    #[test]
    fn test_tags() {
        assert!(Opcode::Ret.is_ctx_switch());
        assert!(Opcode::TailCall.is_ctrl_flow());
        assert!(Opcode::Goto.is_ctrl_flow());
        assert!(!Opcode::Goto.is_ctx_switch());
        assert!(!Opcode::PushLiteral.is_ctrl_flow());
    }
}
