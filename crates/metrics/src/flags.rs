// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Metric behavior flags.

use bitflags::bitflags;

bitflags! {
    /// Bitset controlling how and when a metric is computed and displayed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MetricFlags: u32 {
        /// Computed only for error records.
        const ERROR_ONLY = 1 << 0;
        /// Requires a streaming endpoint.
        const STREAMING_ONLY = 1 << 1;
        /// Requires an endpoint that produces tokens.
        const PRODUCES_TOKENS_ONLY = 1 << 2;
        /// Requires an endpoint that accepts audio.
        const SUPPORTS_AUDIO_ONLY = 1 << 3;
        /// Requires an endpoint that accepts images.
        const SUPPORTS_IMAGE_ONLY = 1 << 4;
        /// Meaningful only for reasoning-capable models.
        const SUPPORTS_REASONING = 1 << 5;
        /// Excluded from the console summary.
        const NO_CONSOLE = 1 << 6;
        /// Excluded from all user-facing surfaces.
        const HIDDEN = 1 << 7;
        /// Internal bookkeeping metric; shown only on request.
        const INTERNAL = 1 << 8;
        /// Not yet considered stable.
        const EXPERIMENTAL = 1 << 9;
        /// Larger values are better (affects goodput comparisons).
        const LARGER_IS_BETTER = 1 << 10;
        /// Participates in goodput computation.
        const GOODPUT = 1 << 11;
        /// Not exported per record, only in aggregate.
        const NO_INDIVIDUAL_RECORDS = 1 << 12;
        /// Only requires tokenization of the input side.
        const TOKENIZES_INPUT_ONLY = 1 << 13;

        /// Streaming endpoints that produce tokens.
        const STREAMING_TOKENS_ONLY =
            Self::STREAMING_ONLY.bits() | Self::PRODUCES_TOKENS_ONLY.bits();
    }
}

impl MetricFlags {
    /// True when every flag in `flags` is set.
    #[must_use]
    pub fn has_flags(self, flags: MetricFlags) -> bool {
        self.contains(flags)
    }

    /// True when at least one flag in `flags` is set.
    #[must_use]
    pub fn has_any_flags(self, flags: MetricFlags) -> bool {
        self.intersects(flags)
    }

    /// True when none of the flags in `flags` are set.
    #[must_use]
    pub fn missing_flags(self, flags: MetricFlags) -> bool {
        !self.intersects(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_tokens_only_is_the_union() {
        let flags = MetricFlags::STREAMING_TOKENS_ONLY;
        assert!(flags.has_flags(MetricFlags::STREAMING_ONLY));
        assert!(flags.has_flags(MetricFlags::PRODUCES_TOKENS_ONLY));
        assert!(flags.missing_flags(MetricFlags::ERROR_ONLY));
    }

    #[test]
    fn flag_queries() {
        let flags = MetricFlags::NO_CONSOLE | MetricFlags::LARGER_IS_BETTER;
        assert!(flags.has_any_flags(MetricFlags::LARGER_IS_BETTER | MetricFlags::HIDDEN));
        assert!(!flags.has_flags(MetricFlags::LARGER_IS_BETTER | MetricFlags::HIDDEN));
        assert!(flags.missing_flags(MetricFlags::HIDDEN));
    }
}
