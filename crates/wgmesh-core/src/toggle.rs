//! Three-valued operation parameters.

/// A tri-state operation parameter: do it, skip it, or decide from observed
/// state.
///
/// The convergence verbs (`up`, `down`, `sync`) all take one of these
/// instead of a nullable boolean: `Force` always performs the side effect,
/// `Skip` never does, and `Auto` lets the operation consult the remote
/// state first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Toggle {
    /// Always perform the side effect.
    Force,
    /// Never perform the side effect.
    Skip,
    /// Decide from the observed remote state.
    #[default]
    Auto,
}

impl Toggle {
    /// Maps a plain boolean flag: `true` forces, `false` skips.
    #[must_use]
    pub fn from_flag(flag: bool) -> Self {
        if flag {
            Self::Force
        } else {
            Self::Skip
        }
    }

    /// Whether this is `Force`.
    #[must_use]
    pub fn force(self) -> bool {
        matches!(self, Self::Force)
    }

    /// Whether this is `Skip`.
    #[must_use]
    pub fn skip(self) -> bool {
        matches!(self, Self::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_auto() {
        assert_eq!(Toggle::default(), Toggle::Auto);
    }

    #[test]
    fn from_flag_maps_edges() {
        assert_eq!(Toggle::from_flag(true), Toggle::Force);
        assert_eq!(Toggle::from_flag(false), Toggle::Skip);
    }
}
