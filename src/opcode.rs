//! Primitive synchronization operation types.

/// Operation types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Opcode {
    /// Acquires exclusive ownership.
    Exclusive,
    /// Consumes the given number of permits or signals.
    Acquire(usize),
    /// Waits for a condition without consuming anything.
    Wait,
}

impl Opcode {
    /// Returns `true` if a granted operation of this type holds resources that must be given back
    /// when the grant is never acknowledged.
    #[inline]
    pub(crate) const fn holds_resources(self) -> bool {
        !matches!(self, Opcode::Wait)
    }
}
