//! The fetch pipeline: source → normalize → synthesize → reconcile → store.
//!
//! Everything up to reconciliation works on an in-memory snapshot. The only
//! side effect is the final store transaction, so a failure at any earlier
//! stage leaves persisted tasks untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::errors::CoreResult;
use crate::model::{PullRequestRef, RepoSlug, TaskSet};
use crate::normalize::{normalize, NormalizeOptions};
use crate::reconcile::{reconcile, ChangeSummary, RetentionPolicy};
use crate::source::ReviewSource;
use crate::store::TaskStore;
use crate::synth::{Classifier, HeuristicClassifier, SynthOptions, Synthesizer};

/// Resolve which pull request to fetch.
///
/// An explicit number wins. Otherwise `current_branch` is consulted and the
/// source looks up the open pull request for it.
pub fn resolve_pr(
    source: &dyn ReviewSource,
    repo: &RepoSlug,
    number: Option<u64>,
    current_branch: impl FnOnce() -> anyhow::Result<String>,
) -> CoreResult<PullRequestRef> {
    if let Some(number) = number {
        return Ok(repo.pull_request(number));
    }
    let branch = current_branch()?;
    tracing::debug!(%branch, "looking up pull request for branch");
    source.find_pr_for_branch(repo, &branch)
}

/// Stage settings, usually derived from [`Config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub normalize: NormalizeOptions,
    pub synth: SynthOptions,
    pub retention: RetentionPolicy,
}

impl From<&Config> for FetchOptions {
    fn from(config: &Config) -> Self {
        Self {
            normalize: NormalizeOptions {
                include_resolved: config.include_resolved,
            },
            synth: SynthOptions {
                max_description_chars: config.max_description_chars,
            },
            retention: config.retention,
        }
    }
}

/// Result of one fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub pr: PullRequestRef,
    /// Raw comments returned by the source.
    pub comments: usize,
    /// Threads that survived normalization.
    pub units: usize,
    /// Candidate tasks synthesized from those threads.
    pub candidates: usize,
    pub summary: ChangeSummary,
    pub set: TaskSet,
}

pub struct FetchPipeline<'a> {
    source: &'a dyn ReviewSource,
    store: &'a TaskStore,
    classifier: Box<dyn Classifier + 'a>,
    options: FetchOptions,
}

impl<'a> FetchPipeline<'a> {
    /// Pipeline with the heuristic classifier.
    #[must_use]
    pub fn new(source: &'a dyn ReviewSource, store: &'a TaskStore, config: &Config) -> Self {
        Self {
            source,
            store,
            classifier: Box::new(HeuristicClassifier::new(config.split_itemized)),
            options: FetchOptions::from(config),
        }
    }

    /// Swap in a different classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier + 'a>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub const fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Fetch `pr` and reconcile its tasks.
    #[tracing::instrument(skip(self, pr), fields(pr = %pr))]
    pub fn run(&self, pr: &PullRequestRef, now: DateTime<Utc>) -> CoreResult<FetchOutcome> {
        let snapshot = self.source.fetch(pr)?;

        let units = normalize(&snapshot.comments, &self.options.normalize);
        let candidates = Synthesizer::new(self.classifier.as_ref(), self.options.synth)
            .synthesize(pr, &units, now);
        tracing::debug!(
            comments = snapshot.comments.len(),
            units = units.len(),
            candidates = candidates.len(),
            "synthesized candidates"
        );

        let comments = snapshot.comments.len();
        let unit_count = units.len();
        let candidate_count = candidates.len();
        let retention = self.options.retention;

        let (summary, set) = self.store.transaction(pr, move |prior| {
            let result = reconcile(prior.as_ref(), pr, candidates, retention, now);
            Ok((result.set.clone(), (result.summary, result.set)))
        })?;

        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            cancelled = summary.cancelled,
            removed = summary.removed,
            "reconciled tasks"
        );

        Ok(FetchOutcome {
            pr: pr.clone(),
            comments,
            units: unit_count,
            candidates: candidate_count,
            summary,
            set,
        })
    }
}
