pub mod recommendations;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ImpactBucket, IssueKind, RankedCause, Severity};
use crate::config::Config;
use crate::model::{ComparativePair, Side};

/// What a recommendation asks the operator to do. Nothing here is executed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    ComputeUpgrade {
        current: Option<String>,
        target: String,
    },
    StorageUpgrade {
        current: Option<String>,
        target: String,
        iops: u32,
    },
    ParameterChange {
        name: String,
        current: String,
        recommended: String,
    },
    IndexStatement {
        sql: String,
    },
    Maintenance {
        statements: Vec<String>,
    },
    Monitoring {
        policy: String,
    },
    ConnectionPooling {
        pooler: String,
        pool_mode: String,
        /// Lists idle sessions by role and application to spot leaks.
        leak_check: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Apply together with the referenced recommendation, not instead of it.
    InAdditionTo,
    /// Redundant once the referenced recommendation is applied.
    SupersededBy,
}

impl Relation {
    pub fn label(self) -> &'static str {
        match self {
            Relation::InAdditionTo => "in addition to",
            Relation::SupersededBy => "superseded by",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub relation: Relation,
    /// Recommendation id (`R1`, ...).
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// `R1`, `R2`, ... in priority order.
    pub id: String,
    pub kind: IssueKind,
    pub side: Side,
    pub priority: Severity,
    pub title: String,
    pub action: Action,
    pub rationale: String,
    pub improvement: ImpactBucket,
    /// `None` when either side of the price lookup is unknown.
    pub monthly_cost_delta: Option<f64>,
    pub dependencies: Vec<Dependency>,
    /// Advisor-local handle that dependencies refer to before ids exist.
    #[serde(skip)]
    pub(crate) key: String,
}

/// Everything an advisor may read. Prices come only from `config.pricing`.
pub struct AdvisorContext<'a> {
    pub pair: &'a ComparativePair,
    pub causes: &'a [RankedCause],
    pub config: &'a Config,
}

impl<'a> AdvisorContext<'a> {
    pub fn cause(&self, kind: IssueKind) -> Option<&'a RankedCause> {
        self.causes.iter().find(|c| c.kind == kind)
    }
}

pub trait Advisor: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation>;
}

pub fn all_advisors() -> Vec<Box<dyn Advisor>> {
    vec![
        Box::new(recommendations::ComputeTierAdvisor),
        Box::new(recommendations::MemoryAdvisor),
        Box::new(recommendations::StorageAdvisor),
        Box::new(recommendations::ConfigDriftAdvisor),
        Box::new(recommendations::MissingIndexAdvisor),
        Box::new(recommendations::FullTableScanAdvisor),
        Box::new(recommendations::UnusedIndexAdvisor),
        Box::new(recommendations::TableBloatAdvisor),
        Box::new(recommendations::AutovacuumAdvisor),
        Box::new(recommendations::LongQueryAdvisor),
        Box::new(recommendations::ConnectionPoolAdvisor),
    ]
}

/// Runs every advisor, orders the output by priority then cause rank, assigns
/// ids and resolves dependencies. Dependencies on recommendations that were
/// not produced are dropped.
pub fn recommend(advisors: &[Box<dyn Advisor>], ctx: &AdvisorContext) -> Vec<Recommendation> {
    let mut recs: Vec<Recommendation> = advisors.iter().flat_map(|a| a.evaluate(ctx)).collect();

    let rank_of = |kind: IssueKind| {
        ctx.cause(kind)
            .map(|c| c.rank)
            .unwrap_or(usize::MAX)
    };
    recs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(rank_of(a.kind).cmp(&rank_of(b.kind)))
    });

    let mut ids: BTreeMap<String, String> = BTreeMap::new();
    for (i, rec) in recs.iter_mut().enumerate() {
        rec.id = format!("R{}", i + 1);
        ids.entry(rec.key.clone()).or_insert_with(|| rec.id.clone());
    }
    for rec in &mut recs {
        rec.dependencies = std::mem::take(&mut rec.dependencies)
            .into_iter()
            .filter_map(|d| {
                ids.get(&d.id).map(|id| Dependency {
                    relation: d.relation,
                    id: id.clone(),
                })
            })
            .filter(|d| d.id != rec.id)
            .collect();
    }
    recs
}
