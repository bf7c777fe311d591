// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The metric registry: explicit registration, dependency validation, and
//! topological ordering.
//!
//! Built once at startup from the builtin catalog (plus goodput metrics
//! configured from user SLOs), then shared read-only by the processors.
//! Every failure here is fatal; a bad catalog must never start a run.

use crate::error::MetricTypeError;
use crate::flags::MetricFlags;
use crate::tags;
use crate::traits::{
    DerivedSumMetric, MetricFactory, MetricInstance, MetricSpec, MetricType, RecordMetric,
};
use crate::types::counts::{
    ErrorRequestCountMetric, MaxResponseTimestampMetric, MinRequestTimestampMetric,
    RequestCountMetric,
};
use crate::types::goodput::{GoodRequestCountMetric, GoodputMetric, NormalizedSlo};
use crate::types::latency::{
    InterChunkLatencyMetric, InterTokenLatencyMetric, OutputTokenThroughputPerUserMetric,
    RequestLatencyMetric, TtftMetric, TtstMetric,
};
use crate::types::throughput::{
    BenchmarkDurationMetric, OutputTokenThroughputMetric, RequestThroughputMetric,
};
use crate::types::tokens::{
    CreditDropLatencyMetric, InputSequenceLengthMetric, InputThroughputMetric,
    OutputSequenceLengthMetric, ReasoningTokenCountMetric,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

struct RegisteredMetric {
    spec: MetricSpec,
    factory: MetricFactory,
}

/// The process-wide metric catalog.
pub struct MetricRegistry {
    metrics: BTreeMap<String, RegisteredMetric>,
}

impl MetricRegistry {
    /// Empty registry; prefer [`MetricRegistry::builtin`].
    #[must_use]
    pub fn new() -> Self {
        Self { metrics: BTreeMap::new() }
    }

    /// Builds the builtin catalog, normalizing goodput SLO thresholds from
    /// display units into native units.
    ///
    /// Fails on an unknown SLO tag, an impossible unit conversion, or any
    /// dependency-graph defect.
    pub fn builtin(goodput_slos: &BTreeMap<String, f64>) -> Result<Self, MetricTypeError> {
        let mut registry = Self::new();

        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(RequestLatencyMetric::new()))
        }))?;
        registry.register(Box::new(|| MetricInstance::Record(Box::new(TtftMetric::new()))))?;
        registry.register(Box::new(|| MetricInstance::Record(Box::new(TtstMetric::new()))))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(InterChunkLatencyMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(InterTokenLatencyMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(OutputTokenThroughputPerUserMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(InputSequenceLengthMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(OutputSequenceLengthMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(ReasoningTokenCountMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(InputThroughputMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Record(Box::new(CreditDropLatencyMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Aggregate(Box::new(RequestCountMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Aggregate(Box::new(ErrorRequestCountMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Aggregate(Box::new(MinRequestTimestampMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Aggregate(Box::new(MaxResponseTimestampMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Derived(Box::new(BenchmarkDurationMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Derived(Box::new(RequestThroughputMetric::new()))
        }))?;
        registry.register(Box::new(|| {
            MetricInstance::Derived(Box::new(OutputTokenThroughputMetric::new()))
        }))?;

        // Sum aggregates inherit unit and flags from their source metric.
        let osl_spec = OutputSequenceLengthMetric::new().spec().clone();
        registry.register(Box::new(move || {
            MetricInstance::Derived(Box::new(DerivedSumMetric::over(
                tags::BENCHMARK_TOKEN_COUNT,
                "Benchmark Token Count",
                &osl_spec,
                MetricFlags::NO_CONSOLE,
            )))
        }))?;
        let reasoning_spec = ReasoningTokenCountMetric::new().spec().clone();
        registry.register(Box::new(move || {
            MetricInstance::Derived(Box::new(DerivedSumMetric::over(
                tags::TOTAL_REASONING_TOKENS,
                "Total Reasoning Tokens",
                &reasoning_spec,
                MetricFlags::NO_CONSOLE,
            )))
        }))?;
        let isl_spec = InputSequenceLengthMetric::new().spec().clone();
        registry.register(Box::new(move || {
            MetricInstance::Derived(Box::new(DerivedSumMetric::over(
                tags::TOTAL_INPUT_TOKENS,
                "Total Input Tokens",
                &isl_spec,
                MetricFlags::NO_CONSOLE,
            )))
        }))?;

        // Goodput thresholds arrive in display units; normalize against the
        // already-registered catalog before the goodput metrics register.
        let slos = registry.normalize_slos(goodput_slos)?;
        registry.register(Box::new(move || {
            MetricInstance::Aggregate(Box::new(GoodRequestCountMetric::new(slos.clone())))
        }))?;
        registry.register(Box::new(|| MetricInstance::Derived(Box::new(GoodputMetric::new()))))?;

        registry.validate()?;
        Ok(registry)
    }

    /// Registers one metric factory, rejecting empty and duplicate tags.
    pub fn register(&mut self, factory: MetricFactory) -> Result<(), MetricTypeError> {
        let spec = factory().spec().clone();
        if spec.tag.is_empty() {
            return Err(MetricTypeError::EmptyTag);
        }
        if self.metrics.contains_key(&spec.tag) {
            return Err(MetricTypeError::DuplicateTag { tag: spec.tag });
        }
        let _ = self.metrics.insert(spec.tag.clone(), RegisteredMetric { spec, factory });
        Ok(())
    }

    fn normalize_slos(
        &self,
        goodput_slos: &BTreeMap<String, f64>,
    ) -> Result<Vec<NormalizedSlo>, MetricTypeError> {
        let mut normalized = Vec::with_capacity(goodput_slos.len());
        for (tag, display_value) in goodput_slos {
            let spec = self
                .metrics
                .get(tag)
                .map(|m| &m.spec)
                .ok_or_else(|| MetricTypeError::UnknownGoodputTag { tag: tag.clone() })?;
            let threshold =
                spec.effective_display_unit().convert_to(spec.unit, *display_value)?;
            normalized.push(NormalizedSlo {
                tag: tag.clone(),
                threshold,
                larger_is_better: spec.flags.has_flags(MetricFlags::LARGER_IS_BETTER),
            });
        }
        Ok(normalized)
    }

    /// Validates the dependency graph: every dependency exists, respects the
    /// allowed-dependency matrix, and the graph is acyclic.
    pub fn validate(&self) -> Result<(), MetricTypeError> {
        for metric in self.metrics.values() {
            for dependency in &metric.spec.required_metrics {
                let dep = self.metrics.get(dependency).ok_or_else(|| {
                    MetricTypeError::UnknownDependency {
                        tag: metric.spec.tag.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                if !dependency_allowed(metric.spec.metric_type, dep.spec.metric_type) {
                    return Err(MetricTypeError::DisallowedDependency {
                        tag: metric.spec.tag.clone(),
                        metric_type: metric.spec.metric_type.to_string(),
                        dependency: dependency.clone(),
                        dependency_type: dep.spec.metric_type.to_string(),
                    });
                }
            }
        }
        let all: Vec<String> = self.metrics.keys().cloned().collect();
        let _ = self.dependency_order_for(&all)?;
        Ok(())
    }

    /// Orders `requested` so every dependency precedes its dependents.
    ///
    /// Dependencies outside `requested` participate in the sort but are
    /// filtered from the output.
    pub fn dependency_order_for(
        &self,
        requested: &[String],
    ) -> Result<Vec<String>, MetricTypeError> {
        let mut nodes: HashSet<String> = requested.iter().cloned().collect();
        for tag in requested {
            if let Some(metric) = self.metrics.get(tag) {
                nodes.extend(metric.spec.required_metrics.iter().cloned());
            }
        }

        // Kahn's algorithm over dep -> dependent edges.
        let mut in_degree: HashMap<String, usize> =
            nodes.iter().map(|tag| (tag.clone(), 0)).collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for tag in &nodes {
            let Some(metric) = self.metrics.get(tag) else { continue };
            for dependency in &metric.spec.required_metrics {
                if nodes.contains(dependency) {
                    dependents.entry(dependency.clone()).or_default().push(tag.clone());
                    if let Some(degree) = in_degree.get_mut(tag) {
                        *degree += 1;
                    }
                }
            }
        }

        let mut ready: VecDeque<String> = {
            let mut zero: Vec<String> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(tag, _)| tag.clone())
                .collect();
            zero.sort();
            zero.into()
        };
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(tag) = ready.pop_front() {
            order.push(tag.clone());
            if let Some(children) = dependents.get(&tag) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push_back(child.clone());
                        }
                    }
                }
            }
        }
        if order.len() != nodes.len() {
            let mut stuck: Vec<String> = nodes
                .iter()
                .filter(|tag| !order.contains(*tag))
                .cloned()
                .collect();
            stuck.sort();
            return Err(MetricTypeError::Cycle { tags: stuck });
        }

        let requested_set: HashSet<&String> = requested.iter().collect();
        Ok(order.into_iter().filter(|tag| requested_set.contains(tag)).collect())
    }

    /// Tags whose flags satisfy `(flags & required) == required` and
    /// `(flags & disallowed) == 0`, optionally restricted to `types`.
    #[must_use]
    pub fn tags_applicable_to(
        &self,
        required_flags: MetricFlags,
        disallowed_flags: MetricFlags,
        types: Option<&[MetricType]>,
    ) -> Vec<String> {
        self.metrics
            .values()
            .filter(|m| m.spec.flags.has_flags(required_flags))
            .filter(|m| m.spec.flags.missing_flags(disallowed_flags))
            .filter(|m| types.is_none_or(|types| types.contains(&m.spec.metric_type)))
            .map(|m| m.spec.tag.clone())
            .collect()
    }

    /// The spec registered for `tag`.
    pub fn spec(&self, tag: &str) -> Result<&MetricSpec, MetricTypeError> {
        self.metrics
            .get(tag)
            .map(|m| &m.spec)
            .ok_or_else(|| MetricTypeError::UnknownTag { tag: tag.to_string() })
    }

    /// A fresh instance of the metric registered for `tag`.
    pub fn create_instance(&self, tag: &str) -> Result<MetricInstance, MetricTypeError> {
        self.metrics
            .get(tag)
            .map(|m| (m.factory)())
            .ok_or_else(|| MetricTypeError::UnknownTag { tag: tag.to_string() })
    }

    /// All registered tags, sorted.
    #[must_use]
    pub fn all_tags(&self) -> Vec<String> {
        self.metrics.keys().cloned().collect()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn dependency_allowed(metric: MetricType, dependency: MetricType) -> bool {
    match metric {
        MetricType::Record => matches!(dependency, MetricType::Record),
        MetricType::SumAggregate => matches!(dependency, MetricType::Record),
        MetricType::Aggregate => {
            matches!(dependency, MetricType::Record | MetricType::Aggregate)
        }
        MetricType::Derived => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricError;
    use crate::units::MetricUnit;
    use crate::value::{MetricRecordMap, MetricResultsMap};
    use aiperf_messages::{MetricValue, ParsedResponseRecord};

    fn registry() -> MetricRegistry {
        MetricRegistry::builtin(&BTreeMap::new()).expect("builtin registry")
    }

    struct FakeMetric {
        spec: MetricSpec,
    }

    impl RecordMetric for FakeMetric {
        fn spec(&self) -> &MetricSpec {
            &self.spec
        }

        fn parse_record(
            &self,
            _record: &ParsedResponseRecord,
            _so_far: &MetricRecordMap,
        ) -> Result<MetricValue, MetricError> {
            Ok(MetricValue::Int(0))
        }
    }

    struct FakeDerived {
        spec: MetricSpec,
    }

    impl crate::traits::DerivedMetric for FakeDerived {
        fn spec(&self) -> &MetricSpec {
            &self.spec
        }

        fn derive_value(
            &self,
            _results: &MetricResultsMap,
        ) -> Result<MetricValue, MetricError> {
            Ok(MetricValue::Int(0))
        }
    }

    fn record_factory(tag: &'static str, requires: &'static [&'static str]) -> MetricFactory {
        Box::new(move || {
            MetricInstance::Record(Box::new(FakeMetric {
                spec: MetricSpec::new(tag, tag, MetricUnit::Requests, MetricType::Record)
                    .requires(requires),
            }))
        })
    }

    #[test]
    fn builtin_catalog_validates() {
        let registry = registry();
        assert!(registry.all_tags().len() >= 20);
        assert!(registry.spec(tags::REQUEST_LATENCY).is_ok());
    }

    #[test]
    fn dependency_order_respects_the_dag() {
        let registry = registry();
        let order = registry
            .dependency_order_for(&[
                tags::OUTPUT_TOKEN_THROUGHPUT_PER_USER.to_string(),
                tags::INTER_TOKEN_LATENCY.to_string(),
                tags::TTFT.to_string(),
                tags::REQUEST_LATENCY.to_string(),
                tags::OUTPUT_SEQUENCE_LENGTH.to_string(),
            ])
            .expect("order");
        let position = |tag: &str| {
            order.iter().position(|t| t == tag).unwrap_or_else(|| panic!("{tag} missing"))
        };
        assert!(position(tags::REQUEST_LATENCY) < position(tags::INTER_TOKEN_LATENCY));
        assert!(position(tags::TTFT) < position(tags::INTER_TOKEN_LATENCY));
        assert!(position(tags::OUTPUT_SEQUENCE_LENGTH) < position(tags::INTER_TOKEN_LATENCY));
        assert!(
            position(tags::INTER_TOKEN_LATENCY)
                < position(tags::OUTPUT_TOKEN_THROUGHPUT_PER_USER)
        );
    }

    #[test]
    fn cycles_are_fatal() {
        let mut registry = MetricRegistry::new();
        registry.register(record_factory("a", &["b"])).expect("register a");
        registry.register(record_factory("b", &["a"])).expect("register b");
        match registry.validate() {
            Err(MetricTypeError::Cycle { tags }) => {
                assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependencies_are_fatal() {
        let mut registry = MetricRegistry::new();
        registry.register(record_factory("a", &["nope"])).expect("register");
        assert!(matches!(
            registry.validate(),
            Err(MetricTypeError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn record_metrics_may_not_depend_on_aggregates() {
        let mut registry = MetricRegistry::new();
        registry.register(Box::new(|| {
            MetricInstance::Aggregate(Box::new(RequestCountMetric::new()))
        })).expect("register aggregate");
        registry
            .register(record_factory("bad_record", &[tags::REQUEST_COUNT]))
            .expect("register record");
        assert!(matches!(
            registry.validate(),
            Err(MetricTypeError::DisallowedDependency { .. })
        ));
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut registry = MetricRegistry::new();
        registry.register(record_factory("a", &[])).expect("first");
        assert!(matches!(
            registry.register(record_factory("a", &[])),
            Err(MetricTypeError::DuplicateTag { .. })
        ));
    }

    #[test]
    fn flag_filters_exclude_streaming_metrics() {
        let registry = registry();
        let tags_without_streaming = registry.tags_applicable_to(
            MetricFlags::empty(),
            MetricFlags::STREAMING_ONLY,
            None,
        );
        assert!(!tags_without_streaming.contains(&tags::TTFT.to_string()));
        assert!(tags_without_streaming.contains(&tags::REQUEST_LATENCY.to_string()));
        let record_only = registry.tags_applicable_to(
            MetricFlags::empty(),
            MetricFlags::empty(),
            Some(&[MetricType::Record]),
        );
        assert!(record_only.contains(&tags::TTFT.to_string()));
        assert!(!record_only.contains(&tags::REQUEST_COUNT.to_string()));
    }

    #[test]
    fn goodput_slos_normalize_display_units() {
        let mut slos = BTreeMap::new();
        // request_latency displays in ms, stores ns.
        slos.insert(tags::REQUEST_LATENCY.to_string(), 250.0);
        let registry = MetricRegistry::builtin(&slos).expect("registry");
        let instance = registry.create_instance(tags::GOOD_REQUEST_COUNT).expect("instance");
        assert_eq!(
            instance.spec().required_metrics,
            vec![tags::REQUEST_LATENCY.to_string()]
        );
    }

    #[test]
    fn unknown_goodput_tags_are_fatal() {
        let mut slos = BTreeMap::new();
        slos.insert("made_up_metric".to_string(), 1.0);
        assert!(matches!(
            MetricRegistry::builtin(&slos),
            Err(MetricTypeError::UnknownGoodputTag { .. })
        ));
    }
}
