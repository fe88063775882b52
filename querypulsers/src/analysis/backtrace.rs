//! Call-site distribution, hotspots and layer breakdown over the sample.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Operation;
use crate::sql_text;

use super::callsite::{self, AppLayer};
use super::n_plus_one::{format_period, span_seconds};
use super::{percentage, round_to, tally, AnalysisContext, Analyzer};

const TOP_GEMS: usize = 5;
const TOP_DB_METHODS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktraceAnalysis {
    pub total_executions: usize,
    pub unique_locations: usize,
    pub most_common_location: Option<LocationCount>,
    pub potential_n_plus_one: RepetitionSignal,
    /// Executions per hour across the sample span.
    pub execution_frequency: f64,
    pub location_distribution: Vec<LocationShare>,
    pub code_hotspots: Vec<CodeHotspot>,
    #[serde(default, with = "super::empty_object")]
    pub execution_contexts: Option<CallSiteContexts>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCount {
    pub location: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationShare {
    pub location: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepetitionSignal {
    pub detected: bool,
    pub suspicious_periods: Vec<SuspiciousPeriod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousPeriod {
    pub period: String,
    pub count: usize,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotspotKind {
    ControllerAction,
    ModelMethod,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeHotspot {
    #[serde(rename = "type")]
    pub kind: HotspotKind,
    pub location: String,
    pub count: usize,
    pub percentage: f64,
    pub operations_per_execution: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkLayer {
    Controller,
    Model,
    View,
    Service,
    Job,
    RailsFramework,
    Activerecord,
}

impl FrameworkLayer {
    const ALL: [FrameworkLayer; 7] = [
        FrameworkLayer::Controller,
        FrameworkLayer::Model,
        FrameworkLayer::View,
        FrameworkLayer::Service,
        FrameworkLayer::Job,
        FrameworkLayer::RailsFramework,
        FrameworkLayer::Activerecord,
    ];

    fn contains(self, location: &str) -> bool {
        match self {
            FrameworkLayer::Controller => location.contains("app/controllers/"),
            FrameworkLayer::Model => location.contains("app/models/"),
            FrameworkLayer::View => location.contains("app/views/"),
            FrameworkLayer::Service => location.contains("app/services/"),
            FrameworkLayer::Job => location.contains("app/jobs/"),
            FrameworkLayer::RailsFramework => {
                location.contains("railties") || location.contains("actionpack")
            }
            FrameworkLayer::Activerecord => location.contains("activerecord"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerShare {
    pub count: usize,
    pub percentage: f64,
}

impl LayerShare {
    fn of(count: usize, total: usize) -> Self {
        Self {
            count,
            percentage: percentage(count, total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemUsage {
    pub gem: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCount {
    pub method: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseAccess {
    pub total_db_operations: usize,
    pub percentage_db_operations: f64,
    pub common_db_methods: Vec<MethodCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSiteContexts {
    pub framework_layers: BTreeMap<FrameworkLayer, LayerShare>,
    pub application_layers: BTreeMap<AppLayer, LayerShare>,
    pub gem_usage: Vec<GemUsage>,
    pub database_access_patterns: DatabaseAccess,
}

pub struct BacktraceAnalyzer<'a> {
    ctx: &'a AnalysisContext<'a>,
}

impl<'a> BacktraceAnalyzer<'a> {
    pub fn new(ctx: &'a AnalysisContext<'a>) -> Self {
        Self { ctx }
    }

    fn locations(&self) -> Vec<&'a str> {
        self.ctx
            .operations
            .iter()
            .filter_map(|op| op.codebase_location.as_deref())
            .filter(|loc| !loc.is_empty())
            .collect()
    }

    fn repetition_signal(&self) -> Result<RepetitionSignal> {
        let mut minutes: BTreeMap<i64, Vec<&Operation>> = BTreeMap::new();
        for op in self.ctx.operations {
            let minute = op.occurred_at.timestamp().div_euclid(60) * 60;
            minutes.entry(minute).or_default().push(op);
        }

        let threshold = self.ctx.config.backtrace.suspicious_per_minute;
        let suspicious_periods = minutes
            .into_iter()
            .filter(|(_, ops)| ops.len() > threshold)
            .map(|(minute, ops)| {
                let total: f64 = ops.iter().map(|op| op.duration).sum();
                Ok(SuspiciousPeriod {
                    period: format_period(minute, Self::NAME)?,
                    count: ops.len(),
                    avg_duration: total / ops.len() as f64,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RepetitionSignal {
            detected: !suspicious_periods.is_empty(),
            suspicious_periods,
        })
    }

    fn execution_frequency(&self) -> f64 {
        let operations = self.ctx.operations;
        if operations.len() < 2 {
            return 0.0;
        }
        let span_hours = span_seconds(operations) / 3600.0;
        if span_hours <= 0.0 {
            return operations.len() as f64;
        }
        round_to(operations.len() as f64 / span_hours, 2)
    }

    fn code_hotspots(&self, locations: &[&str]) -> Vec<CodeHotspot> {
        let settings = &self.ctx.config.backtrace;
        let controllers = locations
            .iter()
            .filter(|loc| loc.contains("app/controllers/"))
            .filter_map(|loc| callsite::controller_method(loc))
            .map(|(controller, action)| {
                format!("{}#{action}", callsite::humanize(&controller.replace("_controller", "")))
            });
        let models = locations
            .iter()
            .filter(|loc| loc.contains("app/models/"))
            .filter_map(|loc| callsite::model_method(loc))
            .map(|(model, method)| format!("{}.{method}", sql_text::classify(model)));
        let files = locations.iter().filter_map(|loc| callsite::app_file(loc));

        let mut hotspots = self.hotspot_group(HotspotKind::ControllerAction, controllers);
        hotspots.extend(self.hotspot_group(HotspotKind::ModelMethod, models));
        hotspots.extend(self.hotspot_group(HotspotKind::File, files));

        hotspots.sort_by(|a, b| b.count.cmp(&a.count));
        hotspots.truncate(settings.top_hotspots);
        hotspots
    }

    fn hotspot_group<I, S>(&self, kind: HotspotKind, items: I) -> Vec<CodeHotspot>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let counts = tally(items);
        let group_total: usize = counts.iter().map(|(_, count)| count).sum();
        let total_operations = self.ctx.operations.len();

        counts
            .into_iter()
            .map(|(location, count)| CodeHotspot {
                kind,
                location,
                count,
                percentage: percentage(count, total_operations),
                operations_per_execution: round_to(
                    count as f64 / group_total as f64 * total_operations as f64,
                    2,
                ),
            })
            .collect()
    }
}

impl Analyzer for BacktraceAnalyzer<'_> {
    type Output = BacktraceAnalysis;
    const NAME: &'static str = "backtrace_analysis";

    fn analyze(&self) -> Result<BacktraceAnalysis> {
        let locations = self.locations();
        let counts = tally(locations.iter().copied());

        let most_common_location = counts
            .iter()
            .fold(None::<&(String, usize)>, |best, entry| match best {
                Some(current) if current.1 >= entry.1 => Some(current),
                _ => Some(entry),
            })
            .map(|(location, count)| LocationCount {
                location: location.clone(),
                count: *count,
                percentage: percentage(*count, locations.len()),
            });

        let mut location_distribution: Vec<LocationShare> = counts
            .iter()
            .map(|(location, count)| LocationShare {
                location: location.clone(),
                percentage: percentage(*count, locations.len()),
            })
            .collect();
        location_distribution.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));
        location_distribution.truncate(self.ctx.config.backtrace.top_locations);

        Ok(BacktraceAnalysis {
            total_executions: self.ctx.operations.len(),
            unique_locations: counts.len(),
            most_common_location,
            potential_n_plus_one: self.repetition_signal()?,
            execution_frequency: self.execution_frequency(),
            location_distribution,
            code_hotspots: self.code_hotspots(&locations),
            execution_contexts: call_site_contexts(&locations),
        })
    }
}

fn call_site_contexts(locations: &[&str]) -> Option<CallSiteContexts> {
    if locations.is_empty() {
        return None;
    }
    let total = locations.len();

    let framework_layers = FrameworkLayer::ALL
        .into_iter()
        .map(|layer| {
            let count = locations.iter().filter(|loc| layer.contains(loc)).count();
            (layer, LayerShare::of(count, total))
        })
        .collect();

    let app_traces: Vec<&str> = locations
        .iter()
        .copied()
        .filter(|loc| loc.contains("app/"))
        .collect();
    let mut app_counts: BTreeMap<AppLayer, usize> = BTreeMap::new();
    for trace in &app_traces {
        *app_counts.entry(AppLayer::of(trace)).or_default() += 1;
    }
    let application_layers = app_counts
        .into_iter()
        .map(|(layer, count)| (layer, LayerShare::of(count, app_traces.len())))
        .collect();

    Some(CallSiteContexts {
        framework_layers,
        application_layers,
        gem_usage: gem_usage(locations),
        database_access_patterns: database_access(locations),
    })
}

fn gem_usage(locations: &[&str]) -> Vec<GemUsage> {
    let library_traces: Vec<&str> = locations
        .iter()
        .copied()
        .filter(|loc| !loc.contains("app/") && !loc.contains("config/"))
        .collect();

    let mut gems = tally(library_traces.iter().filter_map(|loc| callsite::gem_name(loc)));
    gems.sort_by(|a, b| b.1.cmp(&a.1));
    gems.into_iter()
        .take(TOP_GEMS)
        .map(|(gem, count)| GemUsage {
            gem,
            count,
            percentage: percentage(count, library_traces.len()),
        })
        .collect()
}

fn database_access(locations: &[&str]) -> DatabaseAccess {
    let db_traces: Vec<&str> = locations
        .iter()
        .copied()
        .filter(|loc| {
            loc.contains("activerecord") || loc.contains("execute_query") || loc.contains("adapter")
        })
        .collect();

    let mut methods = tally(db_traces.iter().filter_map(|loc| callsite::method_name(loc)));
    methods.sort_by(|a, b| b.1.cmp(&a.1));

    DatabaseAccess {
        total_db_operations: db_traces.len(),
        percentage_db_operations: percentage(db_traces.len(), locations.len()),
        common_db_methods: methods
            .into_iter()
            .take(TOP_DB_METHODS)
            .map(|(method, count)| MethodCount { method, count })
            .collect(),
    }
}
