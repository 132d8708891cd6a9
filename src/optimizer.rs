//! Greedy many-to-one code grouping to sharpen the prediction signal
//!
//! The optimizer relabels vocabulary codes many-to-one, trying to group
//! event codes into categories that predict the target better than the raw
//! alphabet does. Every code starts in a single "noise" bucket; at each
//! step the top-ranked unused codes are promoted to fresh codes of their
//! own, the relabeled store is refitted, and the change is kept only when
//! the score improves by at least the configured threshold.
//!
//! The score is an F1 over the top-`|targets|` predictions (picking exactly
//! as many positives as there are targets makes false negatives equal
//! false positives), adjusted by the Pearson correlation between predicted
//! and observed times when the ranking is neither perfect nor empty.
//!
//! Candidate codes are ranked once, from the tree of the identity
//! relabeling: a code scores high when the lower-bounded target proportion
//! of the nodes it enters lifts well above that of their parents, with
//! shallow codes preferred via an exponential depth decay.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use tracing::debug;

use crate::error::Result;
use crate::predictor::{Aggregate, CodeTreeStats, Predictor, TargetMap, Transform};
use crate::stats::BinomialBounds;
use crate::timeline::TimelineStore;
use crate::vocabulary::Vocabulary;

/// Codes scoring below this floor are never tried.
const MIN_CODE_SCORE: f64 = 5e-7;

/// Parameters of one optimization run. The defaults follow the original
/// tuning: a states model fitted linear/longest at a shallow confidence,
/// with a depth decay that halves a code's score in ~100 levels.
#[derive(Debug, Clone)]
pub struct OptimizeParams {
    /// Steps to iterate; stops early when no candidate codes remain.
    pub num_steps: usize,
    /// Codes promoted from the top of the ranking at each step.
    pub codes_per_step: usize,
    /// Minimum score gain for a step to be adopted.
    pub threshold: f64,
    /// Codes that receive fresh codes before the first step.
    pub force_include: BTreeSet<u64>,
    /// Codes that are never promoted (they stay in the noise bucket).
    pub force_exclude: BTreeSet<u64>,
    /// Fit parameters of the throwaway models scored at each step.
    pub transform: Transform,
    pub aggregate: Aggregate,
    pub confidence: f64,
    pub depth: usize,
    pub as_states: bool,
    /// Decay applied to a candidate's mean tree depth.
    pub exponential_decay: f64,
    /// Confidence level of the bounds used for ranking (not for fitting).
    pub lower_bound_p: f64,
    /// Rank on ln(lift + 1) instead of raw lift.
    pub log_lift: bool,
}

impl Default for OptimizeParams {
    fn default() -> Self {
        Self {
            num_steps: 10,
            codes_per_step: 5,
            threshold: 0.0001,
            force_include: BTreeSet::new(),
            force_exclude: BTreeSet::new(),
            transform: Transform::Linear,
            aggregate: Aggregate::Longest,
            confidence: 0.5,
            depth: 1000,
            as_states: true,
            exponential_decay: 0.00693,
            lower_bound_p: 0.95,
            log_lift: true,
        }
    }
}

struct EvalItem {
    t_hat: f64,
    t_obs: i64,
    seq_len: usize,
}

struct CodeScore {
    code: u64,
    score: f64,
}

/// Optimize the vocabulary codes against a timeline store and its targets.
///
/// The vocabulary is rewritten exactly once, at the end of a successful
/// run: every code becomes `small_dict[code] - code_base`, which collapses
/// the noise bucket and the promoted codes into contiguous small integers
/// (noise lands at 1). The returned transcript starts with `SUCCESS` or
/// `ERROR <reason>`.
pub fn optimize_codes(
    vocabulary: &mut Vocabulary,
    store: &TimelineStore,
    targets: &TargetMap,
    params: &OptimizeParams,
) -> String {
    let mut log = String::new();

    match run(vocabulary, store, targets, params, &mut log) {
        Ok(()) => format!("SUCCESS\n{log}"),
        Err(reason) => format!("ERROR\n{reason}{log}"),
    }
}

fn run(
    vocabulary: &mut Vocabulary,
    store: &TimelineStore,
    targets: &TargetMap,
    params: &OptimizeParams,
    log: &mut String,
) -> std::result::Result<(), String> {
    // The set of codes actually present in the timelines, as an identity
    // relabeling.
    let mut large_dict: BTreeMap<u64, u64> = BTreeMap::new();
    for timeline in store.timelines().values() {
        for &code in timeline.values() {
            large_dict.insert(code, code);
        }
    }

    let Some((&max_code, _)) = large_dict.iter().next_back() else {
        return Err("no codes found in clips\n".to_string());
    };

    let code_base = max_code + 1;
    let code_noise = code_base + 1;
    let mut code_new = code_noise + 1;

    // Everything starts in the noise bucket, except forced inclusions.
    let mut small_dict: BTreeMap<u64, u64> = BTreeMap::new();
    for &code in large_dict.keys() {
        let assigned = if params.force_include.contains(&code) {
            let fresh = code_new;
            code_new += 1;
            fresh
        } else {
            code_noise
        };
        small_dict.insert(code, assigned);
    }

    let _ = writeln!(log, "Preprocessing:\n\n  {} codes found in clips.", large_dict.len());

    // Codes the timelines never use are dead weight in the vocabulary;
    // codes the vocabulary does not know are fatal.
    let keep: BTreeSet<u64> = large_dict.keys().copied().collect();
    let removed = vocabulary.retain_codes(&keep);
    let _ = writeln!(log, "  {removed} codes removed from internal EventMap.");

    let codes = vocabulary.codes();
    if codes.len() != large_dict.len() {
        let _ = writeln!(
            log,
            "  {} codes in clips not defined in internal EventMap.",
            large_dict.len() - codes.len()
        );
        return Err(String::new());
    }

    // Baseline: score the identity relabeling and collect tree statistics
    // for the one-time candidate ranking.
    let mut codes_stat: BTreeMap<u64, CodeTreeStats> = BTreeMap::new();
    let (large_score, targ_prop) =
        score_model(store, targets, &large_dict, params, Some(&mut codes_stat))
            .map_err(|e| format!("score_model() failed: {e}\n"))?;

    let _ = writeln!(log, "  Current score = {large_score:.6}");

    let top_codes = rank_codes(&codes_stat, targ_prop, params);

    let mut best_score = -1.0f64;
    let mut top_ix = 0usize;

    for step in 0..params.num_steps {
        let _ = writeln!(log, "\nStep {} of {}\n", step + 1, params.num_steps);

        let mut dict = small_dict.clone();
        let mut new_codes = 0usize;

        let _ = writeln!(log, "  Trying:");
        while new_codes < params.codes_per_step {
            let Some(candidate) = top_codes.get(top_ix) else {
                break;
            };
            top_ix += 1;

            let code_try = candidate.code;
            if params.force_exclude.contains(&code_try) {
                let _ = writeln!(log, "    Code {code_try} was excluded by the caller");
                continue;
            }

            let _ = writeln!(log, "    Code {code_try} as {}", code_new - code_base);
            dict.insert(code_try, code_new);
            code_new += 1;
            new_codes += 1;
        }

        if new_codes == 0 {
            let _ = writeln!(log, "  -- No more codes --");
            break;
        }

        let (new_score, _) = score_model(store, targets, &dict, params, None)
            .map_err(|e| format!("score_model() failed: {e}\n"))?;
        let _ = writeln!(log, "    ---------------\n    Score = {new_score:.6}");

        if new_score - best_score >= params.threshold {
            best_score = new_score;
            small_dict = dict;
            let _ = writeln!(log, "    Best score so far.");
        } else {
            let _ = writeln!(
                log,
                "    Threshold ({:.6}) not met (diff = {:.6})",
                params.threshold,
                new_score - best_score
            );
        }
    }

    let _ = writeln!(log, "\n== F I N A L ==\n");
    let _ = writeln!(log, "  Final score      = {best_score:.6}");

    let entries: Vec<String> = small_dict
        .iter()
        .map(|(code, assigned)| format!("{code}:{}", assigned - code_base))
        .collect();
    let _ = writeln!(log, "  Final dictionary = {{{}}}", entries.join(", "));

    vocabulary.rebase_codes(&small_dict, code_base);

    Ok(())
}

/// Score one relabeling: clone the store, relabel, fit a throwaway model,
/// and rank its predictions against the observed outcomes. Returns the
/// score and the target proportion at the tree root, and fills `stats`
/// with per-code tree statistics when requested.
fn score_model(
    store: &TimelineStore,
    targets: &TargetMap,
    dict: &BTreeMap<u64, u64>,
    params: &OptimizeParams,
    stats: Option<&mut BTreeMap<u64, CodeTreeStats>>,
) -> Result<(f64, f64)> {
    let mut trial = store.clone();
    for timeline in trial.timelines_mut().values_mut() {
        for code in timeline.values_mut() {
            *code = dict.get(code).copied().unwrap_or(0);
        }
    }
    if params.as_states {
        trial.collapse_to_states();
    }

    let mut model = Predictor::new(trial.into_timelines(), targets.clone());
    model.fit(
        params.transform,
        params.aggregate,
        params.confidence,
        params.depth,
        false,
    )?;

    let root = &model.tree()[0];
    let targ_prop = if root.n_seen > 0 {
        root.n_target as f64 / root.n_seen as f64
    } else {
        0.0
    };

    let t_hat = model.predict_all();

    let mut eval: Vec<EvalItem> = Vec::with_capacity(t_hat.len());
    for ((client_hash, timeline), &prediction) in model.timelines().iter().zip(&t_hat) {
        let mut elapsed = 0i64;

        if let Some(&target_time) = targets.get(client_hash) {
            for (&time_pt, _) in timeline.iter().rev() {
                let et = target_time - time_pt;
                if et > 0 {
                    elapsed = et;
                    break;
                }
            }
            // One-second guard so a target client with no pre-target
            // events still counts as observed.
            elapsed += 1;
        }

        eval.push(EvalItem {
            t_hat: prediction,
            t_obs: elapsed,
            seq_len: timeline.len(),
        });
    }

    eval.sort_by(|a, b| a.t_hat.total_cmp(&b.t_hat).then(a.seq_len.cmp(&b.seq_len)));

    // The |targets| most urgent predictions are the predicted positives.
    let tot_targ = targets.len();
    let (mut tp, mut fp) = (0usize, 0usize);
    for item in eval.iter().take(tot_targ) {
        if item.t_obs != 0 {
            tp += 1;
        } else {
            fp += 1;
        }
    }

    // F1 = 2tp / (2tp + fp + fn), and fn == fp when picking exactly
    // |targets| positives.
    let mut score = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };

    if tp > 0 && tp < tot_targ && tp + fp > 1 {
        let (tp_f, fp_f) = (tp as f64, fp as f64);
        // The mean difference between the tp +/- 1 scores caps the
        // correlation adjustment.
        let max_diff = ((tp_f + 1.0) / (tp_f + 1.0 + fp_f) - (tp_f - 1.0) / (tp_f - 1.0 + fp_f)) / 2.0;
        score += max_diff * pearson(&eval);
    }

    if let Some(stats) = stats {
        for &code in dict.keys() {
            stats.insert(code, CodeTreeStats::default());
        }
        model.tree_stats(stats);
    }

    Ok((score, targ_prop))
}

/// Pearson linear correlation between predicted and observed times over
/// the target clients.
fn pearson(eval: &[EvalItem]) -> f64 {
    let (mut s_h, mut s_o, mut s_ho, mut s_hh, mut s_oo) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
    let mut n = 0u64;

    for item in eval.iter().filter(|item| item.t_obs != 0) {
        let h = item.t_hat;
        let o = item.t_obs as f64;

        s_h += h;
        s_o += o;
        s_ho += h * o;
        s_hh += h * h;
        s_oo += o * o;
        n += 1;
    }

    if n == 0 {
        return 0.0;
    }

    let n = n as f64;
    let d2 = (n * s_hh - s_h * s_h) * (n * s_oo - s_o * s_o);
    if d2 <= 1e-20 {
        return 0.0;
    }

    (n * s_ho - s_h * s_o) / d2.sqrt()
}

/// Rank candidate codes by `edf * incl * lift`, descending, dropping
/// everything below [`MIN_CODE_SCORE`]. The full table is emitted at
/// debug level for diagnosis.
fn rank_codes(
    codes_stat: &BTreeMap<u64, CodeTreeStats>,
    targ_prop: f64,
    params: &OptimizeParams,
) -> Vec<CodeScore> {
    let bounds = BinomialBounds::from_confidence(params.lower_bound_p);

    debug!("n_succ_seen\tn_succ_target\tn_incl_seen\tn_incl_target\tsum_dep\tn_dep\tedf\tprop_succ\tprop_incl\tlift\tscore\tcode");

    let mut scored: Vec<CodeScore> = Vec::with_capacity(codes_stat.len());

    for (&code, stat) in codes_stat {
        let edf = if stat.n_dep > 0 {
            (-params.exponential_decay * stat.sum_dep as f64 / stat.n_dep as f64).exp()
        } else {
            0.0
        };

        let succ = bounds.lower(stat.n_succ_target, stat.n_succ_seen).max(0.0);
        let incl = bounds.lower(stat.n_incl_target, stat.n_incl_seen).max(0.0);

        let mut lift = if succ > 0.001 { incl / succ } else { 0.0 };
        lift = if bounds.upper(stat.n_incl_target, stat.n_incl_seen) < targ_prop {
            0.0
        } else if params.log_lift {
            (lift + 1.0).ln()
        } else {
            lift
        };

        let score = edf * incl * lift;

        debug!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{}",
            stat.n_succ_seen,
            stat.n_succ_target,
            stat.n_incl_seen,
            stat.n_incl_target,
            stat.sum_dep,
            stat.n_dep,
            edf,
            succ,
            incl,
            lift,
            score,
            code
        );

        scored.push(CodeScore { code, score });
    }

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));

    let cut = scored
        .iter()
        .position(|item| item.score < MIN_CODE_SCORE)
        .unwrap_or(scored.len());
    scored.truncate(cut);

    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::Roster;

    /// Two codes A=1, B=2; the client who does A then B hits the target.
    fn fixture() -> (Vocabulary, TimelineStore, TargetMap) {
        let mut vocab = Vocabulary::new();
        vocab.observe("a", "a", 1.0); // code 1
        vocab.observe("b", "b", 1.0); // code 2

        let mut store = TimelineStore::new(Roster::new(), vocab.clone());
        assert!(store.scan("a", "a", 1.0, "hit", "1970-01-02 00:00:00"));
        assert!(store.scan("b", "b", 1.0, "hit", "1970-01-03 00:00:00"));
        assert!(store.scan("b", "b", 1.0, "miss", "1970-01-02 00:00:00"));
        assert!(store.scan("a", "a", 1.0, "miss", "1970-01-03 00:00:00"));

        let mut targets = TargetMap::new();
        targets.insert(crate::hash::hash_str("hit"), 4 * 86400);

        (vocab, store, targets)
    }

    #[test]
    fn test_optimizer_baseline() {
        let (mut vocab, store, targets) = fixture();

        let params = OptimizeParams {
            num_steps: 1,
            depth: 10,
            ..OptimizeParams::default()
        };

        let transcript = optimize_codes(&mut vocab, &store, &targets, &params);

        assert!(transcript.starts_with("SUCCESS\n"), "transcript: {transcript}");
        assert!(transcript.contains("Preprocessing:"));
        assert!(transcript.contains("2 codes found in clips"));
        assert!(transcript.contains("Final dictionary"));
    }

    #[test]
    fn test_codes_missing_from_vocabulary_fail() {
        let (_, store, targets) = fixture();

        // A vocabulary that knows nothing about the codes in the clips.
        let mut empty = Vocabulary::new();
        let transcript = optimize_codes(&mut empty, &store, &targets, &OptimizeParams::default());

        assert!(transcript.starts_with("ERROR\n"), "transcript: {transcript}");
        assert!(transcript.contains("codes in clips not defined"));
    }

    #[test]
    fn test_empty_store_fails() {
        let mut vocab = Vocabulary::new();
        let store = TimelineStore::new(Roster::new(), Vocabulary::new());

        let transcript =
            optimize_codes(&mut vocab, &store, &TargetMap::new(), &OptimizeParams::default());
        assert!(transcript.starts_with("ERROR\n"));
        assert!(transcript.contains("no codes found in clips"));
    }

    #[test]
    fn test_force_exclude_stays_in_noise() {
        let (mut vocab, store, targets) = fixture();

        let params = OptimizeParams {
            num_steps: 2,
            force_exclude: [1u64, 2u64].into_iter().collect(),
            ..OptimizeParams::default()
        };

        let transcript = optimize_codes(&mut vocab, &store, &targets, &params);
        assert!(transcript.starts_with("SUCCESS\n"));

        // With every code excluded, nothing can be promoted: every code
        // rebases to the noise bucket (code_noise - code_base = 1).
        assert_eq!(vocab.codes().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_dead_codes_are_removed() {
        let (mut vocab, store, targets) = fixture();
        // A third code the clips never reference.
        vocab.observe("c", "c", 1.0);

        let transcript = optimize_codes(&mut vocab, &store, &targets, &OptimizeParams::default());
        assert!(transcript.starts_with("SUCCESS\n"));
        assert!(transcript.contains("1 codes removed from internal EventMap."));
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn test_identity_scoring_ranks_perfect_model() {
        let (_, store, targets) = fixture();

        let mut dict: BTreeMap<u64, u64> = BTreeMap::new();
        dict.insert(1, 1);
        dict.insert(2, 2);

        let params = OptimizeParams {
            as_states: false,
            ..OptimizeParams::default()
        };

        let (score, targ_prop) = score_model(&store, &targets, &dict, &params, None).unwrap();

        // One target, two clients: the root proportion is one half. The
        // target client's suffix is unique, so it ranks first and the
        // F1 over the single positive slot is perfect.
        assert!((targ_prop - 0.5).abs() < 1e-9);
        assert!((score - 1.0).abs() < 1e-9);
    }
}
