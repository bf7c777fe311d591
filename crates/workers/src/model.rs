// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-request model selection.

use aiperf_config::{EndpointConfig, ModelSelectionStrategy};
use aiperf_messages::Turn;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Request modality, derived from the turn's attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modality {
    Text,
    Image,
    Audio,
}

fn turn_modality(turn: &Turn) -> Modality {
    if !turn.audio_urls.is_empty() {
        Modality::Audio
    } else if !turn.image_urls.is_empty() {
        Modality::Image
    } else {
        Modality::Text
    }
}

/// Picks the target model for each request.
///
/// Modality-aware selection partitions `model_names` into lanes, one per
/// modality the endpoint supports (text always; image and audio per the
/// endpoint's capability set): lane `l` owns models `l`, `l + lanes`,
/// `l + 2*lanes`, and so on. A turn is routed to its modality's lane and
/// round-robins within it; modalities the endpoint does not support fall
/// back to the text lane.
#[derive(Debug)]
pub struct ModelSelector {
    models: Vec<String>,
    strategy: ModelSelectionStrategy,
    lanes: Vec<Modality>,
    lane_cursors: Vec<usize>,
    next: usize,
    rng: StdRng,
}

impl ModelSelector {
    /// Selector over the endpoint's model list.
    #[must_use]
    pub fn new(endpoint: &EndpointConfig, random_seed: Option<u64>) -> Self {
        let rng = match random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut lanes = vec![Modality::Text];
        if endpoint.endpoint_type.supports_images() {
            lanes.push(Modality::Image);
        }
        if endpoint.endpoint_type.supports_audio() {
            lanes.push(Modality::Audio);
        }
        Self {
            models: endpoint.model_names.clone(),
            strategy: endpoint.model_selection_strategy,
            lane_cursors: vec![0; lanes.len()],
            lanes,
            next: 0,
            rng,
        }
    }

    /// The model for `turn`. A turn-level override wins.
    pub fn select(&mut self, turn: &Turn) -> String {
        if let Some(model) = &turn.model {
            return model.clone();
        }
        match self.strategy {
            ModelSelectionStrategy::RoundRobin => {
                let model = self.models[self.next % self.models.len()].clone();
                self.next = self.next.wrapping_add(1);
                model
            }
            ModelSelectionStrategy::Random => {
                let index = self.rng.random_range(0..self.models.len());
                self.models[index].clone()
            }
            ModelSelectionStrategy::ModalityAware => {
                let modality = turn_modality(turn);
                let lane =
                    self.lanes.iter().position(|l| *l == modality).unwrap_or_default();
                let candidates: Vec<usize> =
                    (lane..self.models.len()).step_by(self.lanes.len()).collect();
                // Fewer models than lanes: the lane is empty, use them all.
                let candidates = if candidates.is_empty() {
                    (0..self.models.len()).collect()
                } else {
                    candidates
                };
                let cursor = &mut self.lane_cursors[lane];
                let index = candidates[*cursor % candidates.len()];
                *cursor = cursor.wrapping_add(1);
                self.models[index].clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiperf_config::EndpointType;
    use std::collections::BTreeMap;

    fn endpoint(
        endpoint_type: EndpointType,
        strategy: ModelSelectionStrategy,
        models: &[&str],
    ) -> EndpointConfig {
        EndpointConfig {
            endpoint_type,
            base_url: "http://localhost".to_string(),
            custom_endpoint: None,
            streaming: false,
            model_names: models.iter().map(|m| (*m).to_string()).collect(),
            model_selection_strategy: strategy,
            endpoint_params: BTreeMap::new(),
            request_timeout_sec: 600.0,
        }
    }

    fn text_turn() -> Turn {
        Turn::from_text("hello")
    }

    fn image_turn() -> Turn {
        let mut turn = Turn::from_text("describe this");
        turn.image_urls.push("http://example/cat.png".to_string());
        turn
    }

    fn audio_turn() -> Turn {
        let mut turn = Turn::from_text("transcribe this");
        turn.audio_urls.push("http://example/clip.wav".to_string());
        turn
    }

    #[test]
    fn round_robin_cycles() {
        let mut selector = ModelSelector::new(
            &endpoint(EndpointType::Chat, ModelSelectionStrategy::RoundRobin, &["a", "b", "c"]),
            None,
        );
        let picks: Vec<String> = (0..6).map(|_| selector.select(&text_turn())).collect();
        assert_eq!(picks, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn turn_override_wins() {
        let mut selector = ModelSelector::new(
            &endpoint(EndpointType::Chat, ModelSelectionStrategy::RoundRobin, &["a", "b", "c"]),
            None,
        );
        let mut turn = text_turn();
        turn.model = Some("special".to_string());
        assert_eq!(selector.select(&turn), "special");
        // The round-robin cursor does not advance on overrides.
        assert_eq!(selector.select(&text_turn()), "a");
    }

    #[test]
    fn random_selection_is_seeded() {
        let config =
            endpoint(EndpointType::Chat, ModelSelectionStrategy::Random, &["a", "b", "c"]);
        let mut a = ModelSelector::new(&config, Some(9));
        let mut b = ModelSelector::new(&config, Some(9));
        let picks_a: Vec<String> = (0..20).map(|_| a.select(&text_turn())).collect();
        let picks_b: Vec<String> = (0..20).map(|_| b.select(&text_turn())).collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn modality_aware_routes_by_attachment() {
        // Chat supports images and audio: lanes are [text, image, audio],
        // so with three models each lane owns exactly one.
        let mut selector = ModelSelector::new(
            &endpoint(
                EndpointType::Chat,
                ModelSelectionStrategy::ModalityAware,
                &["text-model", "vision-model", "audio-model"],
            ),
            None,
        );
        assert_eq!(selector.select(&text_turn()), "text-model");
        assert_eq!(selector.select(&image_turn()), "vision-model");
        assert_eq!(selector.select(&audio_turn()), "audio-model");
        assert_eq!(selector.select(&image_turn()), "vision-model");
    }

    #[test]
    fn modality_aware_round_robins_within_a_lane() {
        // Six models over three lanes: the image lane owns indices 1 and 4.
        let mut selector = ModelSelector::new(
            &endpoint(
                EndpointType::Chat,
                ModelSelectionStrategy::ModalityAware,
                &["t1", "v1", "a1", "t2", "v2", "a2"],
            ),
            None,
        );
        assert_eq!(selector.select(&image_turn()), "v1");
        assert_eq!(selector.select(&image_turn()), "v2");
        assert_eq!(selector.select(&image_turn()), "v1");
        assert_eq!(selector.select(&text_turn()), "t1");
        assert_eq!(selector.select(&text_turn()), "t2");
    }

    #[test]
    fn unsupported_modalities_fall_back_to_the_text_lane() {
        // Completions supports neither images nor audio: a single text lane
        // owns every model, so selection degenerates to round robin.
        let mut selector = ModelSelector::new(
            &endpoint(
                EndpointType::Completions,
                ModelSelectionStrategy::ModalityAware,
                &["a", "b"],
            ),
            None,
        );
        assert_eq!(selector.select(&image_turn()), "a");
        assert_eq!(selector.select(&audio_turn()), "b");
        assert_eq!(selector.select(&text_turn()), "a");
    }

    #[test]
    fn empty_lanes_use_the_whole_model_list() {
        // One model, three lanes: the audio lane is empty and falls back to
        // the full list.
        let mut selector = ModelSelector::new(
            &endpoint(EndpointType::Chat, ModelSelectionStrategy::ModalityAware, &["only"]),
            None,
        );
        assert_eq!(selector.select(&audio_turn()), "only");
        assert_eq!(selector.select(&image_turn()), "only");
    }
}
