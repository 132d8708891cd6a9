//! Prefix-tree learner and time-to-target predictor
//!
//! The model is a bounded-depth tree over *reversed* timelines: each
//! client's sequence is walked latest-event-first, and every suffix path
//! through the tree accumulates how many clients visited it, how many of
//! them hit the target, and the summed (transformed) time left to the
//! target. Nodes live in a contiguous append-only arena addressed by
//! `u32` index; children are code -> index maps, so the structure is
//! acyclic by construction and trivial to persist.
//!
//! Prediction walks a timeline through the tree the same way and turns
//! each matched node into a time estimate: the observed mean time,
//! extrapolated to the full population by dividing by the Agresti-Coull
//! *lower* bound of the target proportion. With thin evidence the lower
//! bound shrinks and the estimate grows, so the `Minimax` aggregation
//! (take the minimum across suffix lengths) systematically trusts the
//! best-supported, most urgent estimate.

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, TempoError};
use crate::hash::hash_str;
use crate::stats::BinomialBounds;
use crate::stream::{BinaryImage, Cursor};
use crate::timeline::{parse_time, Timeline, TimelineMap, DEFAULT_TIME_FORMAT};

/// Prediction returned when a node has never seen the target: a hundred
/// years, in seconds.
pub const PREDICT_MAX_TIME: f64 = 100.0 * 365.25 * 24.0 * 3600.0;

/// Upper limit on the tree depth (= longest learned sequence).
pub const MAX_TREE_DEPTH: usize = 1000;

/// Transformation applied to time differences at fit time and inverted at
/// prediction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Linear,
    Log,
}

impl Transform {
    fn as_u8(self) -> u8 {
        match self {
            Transform::Linear => 0,
            Transform::Log => 1,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Transform::Linear),
            1 => Ok(Transform::Log),
            _ => Err(TempoError::Truncated),
        }
    }
}

impl FromStr for Transform {
    type Err = TempoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Transform::Linear),
            "log" => Ok(Transform::Log),
            _ => Err(TempoError::Config(format!(
                "unknown 'transform' value '{s}' (use linear or log)"
            ))),
        }
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Transform::Linear => "linear",
            Transform::Log => "log",
        })
    }
}

/// How per-depth estimates are folded into a single prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Arithmetic mean over all matched depths.
    Mean,
    /// Minimum over all matched depths: the most urgent estimate.
    Minimax,
    /// The estimate of the deepest matched node only.
    Longest,
}

impl Aggregate {
    fn as_u8(self) -> u8 {
        match self {
            Aggregate::Mean => 0,
            Aggregate::Minimax => 1,
            Aggregate::Longest => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Aggregate::Mean),
            1 => Ok(Aggregate::Minimax),
            2 => Ok(Aggregate::Longest),
            _ => Err(TempoError::Truncated),
        }
    }
}

impl FromStr for Aggregate {
    type Err = TempoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Aggregate::Mean),
            "minimax" => Ok(Aggregate::Minimax),
            "longest" => Ok(Aggregate::Longest),
            _ => Err(TempoError::Config(format!(
                "unknown 'aggregate' value '{s}' (use mean, minimax or longest)"
            ))),
        }
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Aggregate::Mean => "mean",
            Aggregate::Minimax => "minimax",
            Aggregate::Longest => "longest",
        })
    }
}

/// Target times per client: client hash -> timestamp of the target event.
pub type TargetMap = BTreeMap<u64, i64>;

/// One node of the fitted tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeNode {
    /// Clients whose walk visited this node (with or without target).
    pub n_seen: u64,
    /// Clients whose walk visited this node and hit the target.
    pub n_target: u64,
    /// Sum of transformed times to target over the `n_target` visits.
    pub sum_time_d: f64,
    /// Children by code, values are indices into the arena.
    pub children: BTreeMap<u64, u32>,
}

/// Per-code aggregates over the fitted tree, used by the optimizer to rank
/// candidate codes. "incl" counts condition on having entered a node via
/// the code; "succ" counts the parents, i.e. the condition without it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeTreeStats {
    pub n_succ_seen: u64,
    pub n_succ_target: u64,
    pub n_incl_seen: u64,
    pub n_incl_target: u64,
    pub sum_dep: u64,
    pub n_dep: u64,
}

/// Everything the verbose prediction reports for one timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInsight {
    /// Observed seconds from the last pre-target event to the target, or 0
    /// when the client has no target.
    pub obs_time: i64,
    /// Whether the client has a target at all.
    pub target_hit: bool,
    /// Length of the longest reversed sequence matched in the tree.
    pub longest_seq: usize,
    /// Visits of the deepest matched node.
    pub n_visits: u64,
    /// Target hits of the deepest matched node.
    pub n_targets: u64,
    /// Back-transformed mean time of the deepest matched node (0 when it
    /// never saw the target).
    pub target_mean_time: f64,
}

/// The fitted model: timelines, target times, and the suffix tree.
#[derive(Debug, Clone)]
pub struct Predictor {
    timelines: TimelineMap,
    targets: TargetMap,
    tree: Vec<TreeNode>,
    time_format: String,
    transform: Transform,
    aggregate: Aggregate,
    bounds: BinomialBounds,
    tree_depth: usize,
}

impl Predictor {
    /// Build an unfitted model over a set of timelines. The tree starts as
    /// a lone root that aggregates the zero-length-clip statistic.
    pub fn new(timelines: TimelineMap, targets: TargetMap) -> Self {
        Self {
            timelines,
            targets,
            tree: vec![TreeNode::default()],
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            transform: Transform::Log,
            aggregate: Aggregate::Minimax,
            bounds: BinomialBounds::default(),
            tree_depth: 0,
        }
    }

    /// Set the strftime-like format used by [`insert_target`].
    ///
    /// [`insert_target`]: Predictor::insert_target
    pub fn set_time_format(&mut self, format: &str) {
        self.time_format = format.to_string();
    }

    /// Record the target event time for a client. One target per client.
    pub fn insert_target(&mut self, client: &str, time: &str) -> Result<()> {
        if client.is_empty() {
            return Err(TempoError::EmptyClient);
        }

        let Some(time_pt) = parse_time(time, &self.time_format) else {
            return Err(TempoError::BadTimestamp(time.to_string()));
        };

        let client_hash = hash_str(client);
        if self.targets.contains_key(&client_hash) {
            return Err(TempoError::DuplicateTarget);
        }

        self.targets.insert(client_hash, time_pt);
        Ok(())
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    /// Number of nodes in the tree (1 = unfitted).
    pub fn tree_len(&self) -> usize {
        self.tree.len()
    }

    pub fn tree(&self) -> &[TreeNode] {
        &self.tree
    }

    pub fn timelines(&self) -> &TimelineMap {
        &self.timelines
    }

    /// Fit the tree. One-shot: a second call is an error. `p` is clamped
    /// to [0, 0.9999] and `depth` to [1, 1000]. With `as_states` the owned
    /// timelines are collapsed in place first, so later predictions see
    /// states as well.
    pub fn fit(
        &mut self,
        transform: Transform,
        aggregate: Aggregate,
        p: f64,
        depth: usize,
        as_states: bool,
    ) -> Result<()> {
        if self.tree.len() != 1 {
            return Err(TempoError::AlreadyFitted);
        }

        self.transform = transform;
        self.aggregate = aggregate;
        self.tree_depth = depth.clamp(1, MAX_TREE_DEPTH);
        self.bounds = BinomialBounds::from_confidence(p);

        if as_states {
            crate::timeline::collapse_map(&mut self.timelines);
        }

        for (client_hash, timeline) in &self.timelines {
            let target_time = self.targets.get(client_hash).copied().unwrap_or(0);

            let mut time_d = 0.0;
            let mut steps = 0;
            let mut parent = 0u32;

            for (&time_pt, &code) in timeline.iter().rev() {
                if target_time == 0 {
                    parent = Self::update_node(&mut self.tree, parent, code, false, 0.0);
                    steps += 1;
                    if steps == self.tree_depth {
                        break;
                    }
                } else {
                    let elapsed = target_time - time_pt;
                    // Events at or after the target carry no signal.
                    if elapsed > 0 {
                        if steps == 0 {
                            // The first eligible elapsed is reused at every
                            // depth of this walk: it encodes the time from
                            // the clip's last pre-target event to the target.
                            time_d = match transform {
                                Transform::Linear => elapsed as f64,
                                Transform::Log => (elapsed as f64).ln(),
                            };
                        }

                        parent = Self::update_node(&mut self.tree, parent, code, true, time_d);
                        steps += 1;
                        if steps == self.tree_depth {
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            nodes = self.tree.len(),
            clients = self.timelines.len(),
            targets = self.targets.len(),
            "fitted suffix tree"
        );

        Ok(())
    }

    /// Bump the child of `parent` under `code`, appending a fresh node to
    /// the arena when the child does not exist yet. The root aggregates
    /// every client once: it is updated whenever a walk takes its first
    /// step.
    fn update_node(tree: &mut Vec<TreeNode>, parent: u32, code: u64, target: bool, time_d: f64) -> u32 {
        if parent == 0 {
            let root = &mut tree[0];
            root.n_seen += 1;
            if target {
                root.n_target += 1;
                root.sum_time_d += time_d;
            }
        }

        if let Some(&idx) = tree[parent as usize].children.get(&code) {
            let node = &mut tree[idx as usize];
            node.n_seen += 1;
            if target {
                node.n_target += 1;
                node.sum_time_d += time_d;
            }
            return idx;
        }

        let mut node = TreeNode {
            n_seen: 1,
            ..TreeNode::default()
        };
        if target {
            node.n_target = 1;
            node.sum_time_d = time_d;
        }

        tree.push(node);
        let idx = (tree.len() - 1) as u32;
        tree[parent as usize].children.insert(code, idx);

        idx
    }

    /// Back-transformed mean time of a node.
    fn mean_time(&self, node: &TreeNode) -> f64 {
        let raw = node.sum_time_d / node.n_target as f64;
        match self.transform {
            Transform::Linear => raw,
            Transform::Log => raw.exp(),
        }
    }

    /// Predicted time to target for the sub-clip a node stands for.
    ///
    /// The observed mean is taken as the center of a uniform event-time
    /// distribution over observed-target clients; extrapolating to the
    /// whole population divides by the target proportion, and using the
    /// proportion's lower confidence bound instead keeps thin-evidence
    /// nodes from looking urgent.
    fn predict_time(&self, node: &TreeNode) -> f64 {
        if node.n_target == 0 {
            return PREDICT_MAX_TIME;
        }

        let lb = self.bounds.lower(node.n_target, node.n_seen).max(1e-4);

        self.mean_time(node) / lb
    }

    /// Predict one timeline by walking it reversed through the tree.
    fn predict_timeline(&self, timeline: &Timeline) -> f64 {
        let mut idx = 0usize;
        let mut estimates = Vec::new();

        for (_, &code) in timeline.iter().rev() {
            let Some(&child) = self.tree[idx].children.get(&code) else {
                break;
            };
            idx = child as usize;
            estimates.push(self.predict_time(&self.tree[idx]));
        }

        if estimates.is_empty() {
            return self.predict_time(&self.tree[0]);
        }

        match self.aggregate {
            Aggregate::Longest => estimates[estimates.len() - 1],
            Aggregate::Mean => estimates.iter().sum::<f64>() / estimates.len() as f64,
            Aggregate::Minimax => estimates.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    fn is_fitted(&self) -> bool {
        self.tree.len() > 1 && self.tree[0].n_seen > 0
    }

    /// Predict every client the model was fitted on, in client-hash order.
    /// Returns an empty vector when the model is unfitted or saw no data.
    pub fn predict_all(&self) -> Vec<f64> {
        if !self.is_fitted() {
            return Vec::new();
        }

        self.timelines
            .values()
            .map(|timeline| self.predict_timeline(timeline))
            .collect()
    }

    /// Predict the given clients in roster order. Clients without a
    /// fitted timeline get the root's prediction (the zero-length clip).
    pub fn predict_roster(&self, roster: &crate::roster::Roster) -> Vec<f64> {
        if !self.is_fitted() {
            return Vec::new();
        }

        let fallback = self.predict_time(&self.tree[0]);

        roster
            .ids()
            .iter()
            .map(|client_hash| {
                self.timelines
                    .get(client_hash)
                    .map_or(fallback, |timeline| self.predict_timeline(timeline))
            })
            .collect()
    }

    /// Predict a foreign set of timelines (e.g. a held-out test store).
    /// No fallback: every supplied timeline is predicted as-is.
    pub fn predict_map(&self, timelines: &TimelineMap) -> Vec<f64> {
        if !self.is_fitted() {
            return Vec::new();
        }

        timelines
            .values()
            .map(|timeline| self.predict_timeline(timeline))
            .collect()
    }

    /// Verbose prediction for one timeline: observed elapsed time, target
    /// flag, and the statistics of the deepest matched node.
    pub fn insight(&self, client_hash: u64, timeline: &Timeline) -> ClipInsight {
        let target_time = self.targets.get(&client_hash).copied();
        let target_hit = target_time.is_some();
        let target_time = target_time.unwrap_or(0);

        let mut obs_time = 0i64;
        let mut longest_seq = 0usize;
        let mut idx = 0usize;

        for (&time_pt, &code) in timeline.iter().rev() {
            if target_hit {
                let elapsed = target_time - time_pt;
                if elapsed < 0 {
                    continue;
                }
                if longest_seq == 0 {
                    obs_time = elapsed;
                }
            }

            let Some(&child) = self.tree[idx].children.get(&code) else {
                break;
            };
            longest_seq += 1;
            idx = child as usize;
        }

        let node = &self.tree[idx];
        let target_mean_time = if node.n_target > 0 {
            self.mean_time(node)
        } else {
            0.0
        };

        ClipInsight {
            obs_time,
            target_hit,
            longest_seq,
            n_visits: node.n_seen,
            n_targets: node.n_target,
            target_mean_time,
        }
    }

    /// Accumulate per-entering-code statistics over the whole tree. The
    /// root has no entering code and contributes nothing of its own.
    pub fn tree_stats(&self, stats: &mut BTreeMap<u64, CodeTreeStats>) {
        self.recurse_stats(1, 0, stats);
    }

    fn recurse_stats(&self, depth: u64, idx: usize, stats: &mut BTreeMap<u64, CodeTreeStats>) {
        for (&code, &child) in &self.tree[idx].children {
            let node = &self.tree[child as usize];
            let parent = &self.tree[idx];

            let stat = stats.entry(code).or_default();
            stat.n_incl_seen += node.n_seen;
            stat.n_incl_target += node.n_target;
            stat.n_succ_seen += parent.n_seen;
            stat.n_succ_target += parent.n_target;
            stat.sum_dep += depth;
            stat.n_dep += 1;

            self.recurse_stats(depth + 1, child as usize, stats);
        }
    }

    pub fn save(&self, image: &mut BinaryImage) {
        image.put_section("targets");
        image.put_str(&self.time_format);
        image.put_u8(self.transform.as_u8());
        image.put_u8(self.aggregate.as_u8());
        image.put_f64(self.bounds.z());
        image.put_u64(self.tree_depth as u64);

        image.put_section("clip_map");
        image.put_u64(self.timelines.len() as u64);
        for (client_hash, timeline) in &self.timelines {
            image.put_u64(*client_hash);
            image.put_u64(timeline.len() as u64);
            for (&time_pt, &code) in timeline {
                image.put_i64(time_pt);
                image.put_u64(code);
            }
        }

        image.put_section("target");
        image.put_u64(self.targets.len() as u64);
        for (&client_hash, &time_pt) in &self.targets {
            image.put_u64(client_hash);
            image.put_i64(time_pt);
        }

        image.put_section("tree");
        image.put_u64(self.tree.len() as u64);
        for node in &self.tree {
            image.put_u64(node.n_seen);
            image.put_u64(node.n_target);
            image.put_f64(node.sum_time_d);
            image.put_u64(node.children.len() as u64);
            for (&code, &child) in &node.children {
                image.put_u64(code);
                image.put_u64(u64::from(child));
            }
        }

        image.put_section("end");
    }

    /// Load into a freshly constructed model (lone root, no timelines, no
    /// targets); anything else is rejected.
    pub fn load(&mut self, image: &BinaryImage, cursor: &mut Cursor) -> Result<()> {
        image.expect_section(cursor, "targets")?;
        self.time_format = image.get_str(cursor)?;
        self.transform = Transform::from_u8(image.get_u8(cursor)?)?;
        self.aggregate = Aggregate::from_u8(image.get_u8(cursor)?)?;
        self.bounds = BinomialBounds::from_z(image.get_f64(cursor)?);
        self.tree_depth = image.get_u64(cursor)? as usize;

        image.expect_section(cursor, "clip_map")?;
        if !self.timelines.is_empty() {
            return Err(TempoError::NotEmpty("timeline map"));
        }
        let num_clients = image.get_u64(cursor)?;
        for _ in 0..num_clients {
            let client_hash = image.get_u64(cursor)?;
            let num_points = image.get_u64(cursor)?;

            let mut timeline = Timeline::new();
            for _ in 0..num_points {
                let time_pt = image.get_i64(cursor)?;
                let code = image.get_u64(cursor)?;
                timeline.insert(time_pt, code);
            }
            self.timelines.insert(client_hash, timeline);
        }

        image.expect_section(cursor, "target")?;
        if !self.targets.is_empty() {
            return Err(TempoError::NotEmpty("target map"));
        }
        let num_targets = image.get_u64(cursor)?;
        for _ in 0..num_targets {
            let client_hash = image.get_u64(cursor)?;
            let time_pt = image.get_i64(cursor)?;
            self.targets.insert(client_hash, time_pt);
        }

        image.expect_section(cursor, "tree")?;
        if self.tree.len() != 1 {
            return Err(TempoError::NotEmpty("tree"));
        }
        let num_nodes = image.get_u64(cursor)?;
        for i in 0..num_nodes {
            let mut node = TreeNode {
                n_seen: image.get_u64(cursor)?,
                n_target: image.get_u64(cursor)?,
                sum_time_d: image.get_f64(cursor)?,
                children: BTreeMap::new(),
            };

            let num_children = image.get_u64(cursor)?;
            for _ in 0..num_children {
                let code = image.get_u64(cursor)?;
                let child = image.get_u64(cursor)? as u32;
                node.children.insert(code, child);
            }

            if i == 0 {
                self.tree[0] = node;
            } else {
                self.tree.push(node);
            }
        }

        image.expect_section(cursor, "end")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(points: &[(i64, u64)]) -> Timeline {
        points.iter().copied().collect()
    }

    /// One client with timeline [(1, A=1), (2, B=2)] and a target at 3,
    /// fitted linear with p = 0.
    fn small_fitted() -> Predictor {
        let mut timelines = TimelineMap::new();
        timelines.insert(10, timeline(&[(1, 1), (2, 2)]));

        let mut targets = TargetMap::new();
        targets.insert(10, 3);

        let mut model = Predictor::new(timelines, targets);
        model
            .fit(Transform::Linear, Aggregate::Minimax, 0.0, 4, false)
            .unwrap();
        model
    }

    #[test]
    fn test_tree_shape() {
        let model = small_fitted();
        let tree = model.tree();

        // Root counts the client once; the first reversed elapsed (3-2=1)
        // is reused at depth 2 even though that event is 2 seconds out.
        assert_eq!(tree.len(), 3);
        assert_eq!((tree[0].n_seen, tree[0].n_target), (1, 1));
        assert_eq!(tree[0].sum_time_d, 1.0);

        let b = tree[0].children[&2] as usize;
        assert_eq!((tree[b].n_seen, tree[b].n_target), (1, 1));
        assert_eq!(tree[b].sum_time_d, 1.0);

        let a = tree[b].children[&1] as usize;
        assert_eq!((tree[a].n_seen, tree[a].n_target), (1, 1));
        assert_eq!(tree[a].sum_time_d, 1.0);

        // Child indices strictly exceed their parent's.
        assert!(b > 0 && a > b);
    }

    #[test]
    fn test_prediction_aggregation() {
        let model = small_fitted();

        // Matches [A, B] at depth 2; every per-depth estimate is 1/lb(1,1)
        // and lb is the raw proportion 1 at p = 0.
        let matched = timeline(&[(100, 1), (200, 2)]);
        let t = model.predict_timeline(&matched);
        assert!((t - 1.0).abs() < 1e-4);

        // Reversed, the first code is A, which is not a child of the root:
        // zero-length match falls back to the root's prediction.
        let unmatched = timeline(&[(100, 2), (200, 1)]);
        let t = model.predict_timeline(&unmatched);
        assert!((t - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_fit_is_one_shot() {
        let mut model = small_fitted();
        assert!(matches!(
            model.fit(Transform::Linear, Aggregate::Minimax, 0.0, 4, false),
            Err(TempoError::AlreadyFitted)
        ));
    }

    #[test]
    fn test_depth_limit() {
        let mut timelines = TimelineMap::new();
        timelines.insert(1, timeline(&[(1, 1), (2, 2), (3, 3), (4, 4)]));

        let mut model = Predictor::new(timelines, TargetMap::new());
        model
            .fit(Transform::Linear, Aggregate::Minimax, 0.0, 2, false)
            .unwrap();

        // Root + two steps of the reversed walk.
        assert_eq!(model.tree_len(), 3);
    }

    #[test]
    fn test_non_target_clients_count_without_time() {
        let mut timelines = TimelineMap::new();
        timelines.insert(1, timeline(&[(1, 1)]));
        timelines.insert(2, timeline(&[(5, 1)]));

        let mut targets = TargetMap::new();
        targets.insert(1, 10);

        let mut model = Predictor::new(timelines, targets);
        model
            .fit(Transform::Linear, Aggregate::Mean, 0.0, 8, false)
            .unwrap();

        let tree = model.tree();
        assert_eq!((tree[0].n_seen, tree[0].n_target), (2, 1));
        assert_eq!(tree[0].sum_time_d, 9.0);

        let node = tree[0].children[&1] as usize;
        assert_eq!((tree[node].n_seen, tree[node].n_target), (2, 1));
        // n_target <= n_seen everywhere.
        for node in tree {
            assert!(node.n_target <= node.n_seen);
        }
    }

    #[test]
    fn test_events_after_target_are_skipped() {
        let mut timelines = TimelineMap::new();
        timelines.insert(1, timeline(&[(1, 1), (50, 2)]));

        let mut targets = TargetMap::new();
        targets.insert(1, 10);

        let mut model = Predictor::new(timelines, targets);
        model
            .fit(Transform::Linear, Aggregate::Mean, 0.0, 8, false)
            .unwrap();

        // The event at t=50 is past the target; only code 1 enters the
        // tree, with elapsed 10 - 1 = 9.
        assert_eq!(model.tree_len(), 2);
        assert_eq!(model.tree()[0].children.get(&2), None);
        assert_eq!(model.tree()[1].sum_time_d, 9.0);
    }

    #[test]
    fn test_empty_store_predicts_empty() {
        let mut model = Predictor::new(TimelineMap::new(), TargetMap::new());
        model
            .fit(Transform::Log, Aggregate::Minimax, 0.9, 8, false)
            .unwrap();

        assert!(model.predict_all().is_empty());
        assert!(model.predict_map(&TimelineMap::new()).is_empty());
    }

    #[test]
    fn test_no_target_node_predicts_sentinel() {
        let mut timelines = TimelineMap::new();
        timelines.insert(1, timeline(&[(1, 1)]));

        let mut model = Predictor::new(timelines, TargetMap::new());
        model
            .fit(Transform::Linear, Aggregate::Minimax, 0.9, 8, false)
            .unwrap();

        let predictions = model.predict_all();
        assert_eq!(predictions, vec![PREDICT_MAX_TIME]);
    }

    #[test]
    fn test_predict_roster_falls_back_to_root() {
        let model = small_fitted();

        let mut roster = crate::roster::Roster::new();
        roster.add("stranger");

        let predictions = model.predict_roster(&roster);
        assert_eq!(predictions.len(), 1);
        // Root has n_target = 1, n_seen = 1, mean 1.0, lb 1.0 at p = 0.
        assert!((predictions[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_as_states_collapses_owned_timelines() {
        let mut timelines = TimelineMap::new();
        timelines.insert(1, timeline(&[(0, 1), (1, 1), (2, 2)]));

        let mut model = Predictor::new(timelines, TargetMap::new());
        model
            .fit(Transform::Linear, Aggregate::Minimax, 0.0, 8, true)
            .unwrap();

        assert_eq!(model.timelines()[&1].len(), 2);
        // Reversed states walk: B then A.
        assert_eq!(model.tree_len(), 3);
    }

    #[test]
    fn test_insight() {
        let model = small_fitted();

        let insight = model.insight(10, &timeline(&[(1, 1), (2, 2)]));
        assert!(insight.target_hit);
        assert_eq!(insight.obs_time, 1);
        assert_eq!(insight.longest_seq, 2);
        assert_eq!(insight.n_visits, 1);
        assert_eq!(insight.n_targets, 1);
        assert!((insight.target_mean_time - 1.0).abs() < 1e-9);

        // Unknown client: no target, zero-length match against the root.
        let insight = model.insight(99, &timeline(&[(1, 3)]));
        assert!(!insight.target_hit);
        assert_eq!(insight.obs_time, 0);
        assert_eq!(insight.longest_seq, 0);
        assert_eq!(insight.n_visits, 1);
    }

    #[test]
    fn test_tree_stats() {
        let model = small_fitted();

        let mut stats = BTreeMap::new();
        model.tree_stats(&mut stats);

        // Code 2 enters at depth 1 under the root, code 1 at depth 2.
        let b = &stats[&2];
        assert_eq!((b.n_incl_seen, b.n_succ_seen), (1, 1));
        assert_eq!((b.sum_dep, b.n_dep), (1, 1));

        let a = &stats[&1];
        assert_eq!((a.sum_dep, a.n_dep), (2, 1));
    }

    #[test]
    fn test_save_load_round_trip() {
        let model = small_fitted();

        let mut image = BinaryImage::new();
        model.save(&mut image);

        let mut restored = Predictor::new(TimelineMap::new(), TargetMap::new());
        let mut cursor = Cursor::default();
        restored.load(&image, &mut cursor).unwrap();

        assert_eq!(restored.tree(), model.tree());
        assert_eq!(restored.timelines(), model.timelines());
        assert_eq!(restored.num_targets(), model.num_targets());
        assert_eq!(restored.transform, model.transform);
        assert_eq!(restored.aggregate, model.aggregate);
        assert_eq!(restored.tree_depth, model.tree_depth);
        assert_eq!(restored.predict_all(), model.predict_all());

        // A fitted model is not a valid load destination.
        let mut cursor = Cursor::default();
        assert!(matches!(
            restored.load(&image, &mut cursor),
            Err(TempoError::NotEmpty(_))
        ));
    }
}
