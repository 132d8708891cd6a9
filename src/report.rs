//! Output files of a batch run: RESULTS.md and PREDICTIONS.tsv

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::Result;
use crate::predictor::Predictor;
use crate::timeline::TimelineMap;

/// Elapsed seconds per pipeline stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub events: f64,
    pub clients: f64,
    pub clips: f64,
    pub target_map: f64,
    pub fit: f64,
    pub predict: f64,
    pub total: f64,
}

/// Sizes of the objects a run produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSizes {
    pub num_transactions: u64,
    pub num_events: usize,
    pub num_clients: usize,
    pub num_clips: usize,
    pub num_points: u64,
    pub num_test_clips: usize,
    pub num_test_points: u64,
    pub num_targets: usize,
    pub tree_len: usize,
    pub num_predictions: usize,
}

fn path_str(path: &Option<PathBuf>) -> String {
    path.as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

/// Write the run report: arguments, per-stage timings, object sizes, and
/// the legend of the predictions file.
pub fn write_results(
    path: &Path,
    config: &RunConfig,
    timings: &StageTimings,
    sizes: &ObjectSizes,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(out, "TEMPOGRAPH")?;
    writeln!(out, "----------")?;
    writeln!(out)?;
    writeln!(out, "Command line arguments given:")?;
    writeln!(out)?;
    writeln!(out, "  transactions : {}", path_str(&config.transactions))?;
    writeln!(
        out,
        "  max_events   : {}",
        config.max_events.map_or(String::new(), |n| n.to_string())
    )?;
    writeln!(out, "  events       : {}", path_str(&config.events))?;
    writeln!(out, "  clients      : {}", path_str(&config.clients))?;
    writeln!(out, "  targets      : {}", path_str(&config.targets))?;
    writeln!(out, "  train        : {}", path_str(&config.train))?;
    writeln!(out, "  test         : {}", path_str(&config.test))?;
    writeln!(out, "  output       : {}", path_str(&config.output))?;
    writeln!(out, "  transform    : {}", config.transform)?;
    writeln!(out, "  aggregate    : {}", config.aggregate)?;
    writeln!(out, "  fit_p        : {:.3}", config.fit_p)?;
    writeln!(out, "  tree_depth   : {}", config.tree_depth)?;
    writeln!(out, "  as_states    : {}", i32::from(config.as_states))?;
    writeln!(out)?;
    writeln!(out, "Running times (sec):")?;
    writeln!(out)?;
    writeln!(out, "  building events     : {:.3}", timings.events)?;
    writeln!(out, "  loading clients     : {:.3}", timings.clients)?;
    writeln!(out, "  building clips      : {:.3}", timings.clips)?;
    writeln!(out, "  building target map : {:.3}", timings.target_map)?;
    writeln!(out, "  fitting tree        : {:.3}", timings.fit)?;
    writeln!(out, "  predicting times    : {:.3}", timings.predict)?;
    writeln!(out)?;
    writeln!(out, "  total               : {:.3}", timings.total)?;
    writeln!(out)?;
    writeln!(out, "Object sizes:")?;
    writeln!(out)?;
    writeln!(out, "  transactions.num_rows : {}", sizes.num_transactions)?;
    writeln!(out, "  events.num_events     : {}", sizes.num_events)?;
    writeln!(out, "  clients.num_clients   : {}", sizes.num_clients)?;
    writeln!(out, "  clips.num_clips       : {}", sizes.num_clips)?;
    writeln!(out, "  clips.num_events      : {}", sizes.num_points)?;
    writeln!(out, "  clips_test.num_clips  : {}", sizes.num_test_clips)?;
    writeln!(out, "  clips_test.num_events : {}", sizes.num_test_points)?;
    writeln!(out, "  targets.num_targets   : {}", sizes.num_targets)?;
    writeln!(out, "  targets.tree_size     : {}", sizes.tree_len)?;
    writeln!(out, "  pred_time.size()      : {}", sizes.num_predictions)?;
    writeln!(out)?;
    writeln!(out, "Legend of PREDICTIONS.tsv:")?;
    writeln!(out)?;
    writeln!(out, "  client_id   : The id of the client predicted (test or transactions).")?;
    writeln!(out, "  obs_time    : Time from last event to target (observed).")?;
    writeln!(out, "  target_yn   : The client hit the target (yes/no).")?;
    writeln!(out, "  pred_time   : Time from last event to target (predicted).")?;
    writeln!(out, "  longest_seq : Longest event sequence in the tree.")?;
    writeln!(out, "  n_visits    : # of visits for the longest sequence.")?;
    writeln!(out, "  n_targets   : # of clients who hit the target for the longest sequence.")?;
    writeln!(out, "  targ_mean_t : Mean observed time for those who hit (also longest seq).")?;

    out.flush()?;
    Ok(())
}

/// Write one prediction row per client in `timelines`, pairing each
/// timeline's verbose insight with its predicted time. Times are seconds;
/// `pred_time` and `targ_mean_t` carry one decimal.
pub fn write_predictions(
    path: &Path,
    predictor: &Predictor,
    timelines: &TimelineMap,
    predictions: &[f64],
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(
        out,
        "client_id\tobs_time\ttarget_yn\tpred_time\tlongest_seq\tn_visits\tn_targets\ttarg_mean_t"
    )?;

    for ((client_hash, timeline), prediction) in timelines.iter().zip(predictions) {
        let insight = predictor.insight(*client_hash, timeline);

        writeln!(
            out,
            "{}\t{}\t{}\t{:.1}\t{}\t{}\t{}\t{:.1}",
            client_hash,
            insight.obs_time,
            i32::from(insight.target_hit),
            prediction,
            insight.longest_seq,
            insight.n_visits,
            insight.n_targets,
            insight.target_mean_time
        )?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::{Aggregate, Predictor, TargetMap, Transform};
    use crate::timeline::Timeline;

    #[test]
    fn test_predictions_file_shape() {
        let mut timelines = TimelineMap::new();
        timelines.insert(5, Timeline::from([(1, 1), (2, 2)]));

        let mut targets = TargetMap::new();
        targets.insert(5, 3);

        let mut model = Predictor::new(timelines, targets);
        model
            .fit(Transform::Linear, Aggregate::Minimax, 0.0, 4, false)
            .unwrap();

        let predictions = model.predict_all();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PREDICTIONS.tsv");

        write_predictions(&path, &model, model.timelines(), &predictions).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next().unwrap(),
            "client_id\tobs_time\ttarget_yn\tpred_time\tlongest_seq\tn_visits\tn_targets\ttarg_mean_t"
        );

        let row: Vec<&str> = lines.next().unwrap().split('\t').collect();
        assert_eq!(row[0], "5");
        assert_eq!(row[1], "1"); // observed elapsed
        assert_eq!(row[2], "1"); // target hit
        assert_eq!(row[3], "1.0"); // predicted, one decimal
        assert_eq!(row[4], "2"); // longest matched sequence
        assert!(lines.next().is_none());
    }
}
