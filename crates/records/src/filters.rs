// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Capability-driven metric filters.
//!
//! The endpoint's capability set (tokens, audio, images, streaming) and the
//! goodput configuration decide which metrics exist for a run. Both
//! pipeline stages derive their metric lists from the same filter so stage
//! 1 never computes a value stage 2 would discard.

use aiperf_config::UserConfig;
use aiperf_metrics::MetricFlags;

/// The `(required, disallowed)` flag filter for a run.
#[must_use]
pub fn flag_filters(user_config: &UserConfig) -> (MetricFlags, MetricFlags) {
    let required = MetricFlags::empty();
    let mut disallowed = MetricFlags::empty();
    let endpoint_type = user_config.endpoint.endpoint_type;
    if !endpoint_type.produces_tokens() {
        disallowed |= MetricFlags::PRODUCES_TOKENS_ONLY;
    }
    if !endpoint_type.supports_audio() {
        disallowed |= MetricFlags::SUPPORTS_AUDIO_ONLY;
    }
    if !endpoint_type.supports_images() {
        disallowed |= MetricFlags::SUPPORTS_IMAGE_ONLY;
    }
    if !user_config.endpoint.streaming {
        disallowed |= MetricFlags::STREAMING_ONLY;
    }
    if user_config.goodput_slos.is_empty() {
        disallowed |= MetricFlags::GOODPUT;
    }
    if !user_config.output.show_internal_metrics {
        disallowed |= MetricFlags::INTERNAL;
    }
    (required, disallowed)
}
