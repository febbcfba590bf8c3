//! Tag bitmask carried by every [`crate::term::Term`] and every
//! [`crate::reference::TermReference`].

use bitflags::bitflags;

bitflags! {
    /// Orthogonal, composable qualifiers on a term or a reference to one.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
    pub struct Tags: u8 {
        /// No special qualification.
        const UNQUALIFIED  = 0;
        /// Bound object is a prvalue/xvalue: consumable, safe to move from.
        const UNIQUE       = 1 << 0;
        /// `const` view; no mutation may occur through this handle.
        const NONMODIFYING = 1 << 1;
        /// Object was initialized from a temporary; safe to move.
        const TEMPORARY    = 1 << 2;
        /// Administrative subterm, not part of user-visible list structure.
        const STICKY       = 1 << 3;
    }
}

impl Tags {
    /// `!Nonmodifying`.
    pub fn is_modifiable(self) -> bool {
        !self.contains(Tags::NONMODIFYING)
    }

    pub fn is_unique(self) -> bool {
        self.contains(Tags::UNIQUE)
    }

    pub fn is_temporary(self) -> bool {
        self.contains(Tags::TEMPORARY)
    }

    pub fn is_sticky(self) -> bool {
        self.contains(Tags::STICKY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_is_modifiable() {
        assert!(Tags::UNQUALIFIED.is_modifiable());
    }

    #[test]
    fn nonmodifying_blocks_modification() {
        assert!(!Tags::NONMODIFYING.is_modifiable());
    }

    #[test]
    fn tags_compose() {
        let t = Tags::UNIQUE | Tags::TEMPORARY;
        assert!(t.is_unique());
        assert!(t.is_temporary());
        assert!(!t.is_sticky());
    }
}
