//! The batch pipeline behind the command line interface
//!
//! Wires the whole flow together: build (or read) the event vocabulary,
//! load the client roster, ingest the training transactions into
//! timelines, load the target times, fit the tree, predict, and write the
//! output files. Each stage is timed for the run report.
//!
//! Firehose inputs (transactions, train, test) drop malformed rows
//! silently; configuration inputs (events, targets, missing files, a
//! pre-existing output directory) fail the run.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::{Result, TempoError};
use crate::predictor::{Predictor, TargetMap};
use crate::report::{self, ObjectSizes, StageTimings};
use crate::roster::Roster;
use crate::timeline::TimelineStore;
use crate::vocabulary::Vocabulary;

fn open_lines(path: &Path, what: &str) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        TempoError::Config(format!("could not read {what} file '{}': {e}", path.display()))
    })?;

    Ok(BufReader::new(file).lines())
}

/// Execute one batch run end to end, writing RESULTS.md and
/// PREDICTIONS.tsv into the configured output directory.
pub fn run(config: &RunConfig) -> Result<()> {
    let run_start = Instant::now();

    // Stage 1: the event vocabulary, either explicit or discovered.
    // Strings are not kept: the run only ever reports hashes.
    let mut vocabulary = Vocabulary::new();
    vocabulary.set_store_strings(false);

    let mut num_transactions = 0u64;

    if let Some(events_path) = &config.events {
        if config.max_events.is_some() {
            warn!("'max_events' is ignored because 'events' is given");
        }

        for line in open_lines(events_path, "'events'")? {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let mut fields = line.splitn(4, '\t');
            let (Some(emitter), Some(description), Some(weight), Some(code)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let (Ok(weight), Ok(code)) = (weight.parse::<f64>(), code.parse::<u64>()) else {
                continue;
            };

            vocabulary.define(emitter, description, weight, code)?;
        }
    } else {
        let Some(max_events) = config.max_events else {
            return Err(TempoError::Config(
                "'max_events' is required when 'events' is not given".to_string(),
            ));
        };
        let Some(transactions_path) = &config.transactions else {
            return Err(TempoError::Config(
                "'transactions' file is required to discover events".to_string(),
            ));
        };

        vocabulary.set_max_events(max_events);

        for line in open_lines(transactions_path, "'transactions'")? {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let mut fields = line.splitn(4, '\t');
            let (Some(emitter), Some(description), Some(weight)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Ok(weight) = weight.parse::<f64>() else {
                continue;
            };

            vocabulary.observe(emitter, description, weight);
            num_transactions += 1;
        }
    }

    let elapsed_events = run_start.elapsed().as_secs_f64();
    let mut stage_start = Instant::now();
    info!(num_events = vocabulary.len(), "event vocabulary ready");

    // Stage 2: the client roster (optional allow-list).
    let mut roster = Roster::new();

    if let Some(clients_path) = &config.clients {
        for line in open_lines(clients_path, "'clients'")? {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                roster.add(line);
            }
        }
    }

    let elapsed_clients = stage_start.elapsed().as_secs_f64();
    stage_start = Instant::now();
    info!(num_clients = roster.len(), "client roster ready");

    // Stage 3: timelines from the training transactions.
    let mut clips = TimelineStore::new(roster.clone(), vocabulary.clone());

    let train_path = config.train.as_deref().or(config.transactions.as_deref());
    let Some(train_path) = train_path else {
        return Err(TempoError::Config(
            "no 'train' or 'transactions' file given".to_string(),
        ));
    };

    for line in open_lines(train_path, "'train' or 'transactions'")? {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        scan_row(&mut clips, line);
    }

    let elapsed_clips = stage_start.elapsed().as_secs_f64();
    stage_start = Instant::now();
    info!(
        num_clips = clips.len(),
        num_points = clips.num_points(),
        "timelines built"
    );

    // Stage 4: target times.
    let Some(targets_path) = &config.targets else {
        return Err(TempoError::Config("no 'targets' file given".to_string()));
    };

    let mut predictor = Predictor::new(clips.timelines().clone(), TargetMap::new());

    for line in open_lines(targets_path, "'targets'")? {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let Some((client, time)) = line.split_once('\t') else {
            continue;
        };

        match predictor.insert_target(client, time) {
            Ok(()) => {}
            Err(TempoError::BadTimestamp(t)) => {
                warn!(client, time = %t, "skipping target with invalid timestamp");
            }
            Err(e) => return Err(e),
        }
    }

    let elapsed_target_map = stage_start.elapsed().as_secs_f64();
    stage_start = Instant::now();
    info!(num_targets = predictor.num_targets(), "targets loaded");

    // Stage 5: fit.
    predictor.fit(
        config.transform,
        config.aggregate,
        config.fit_p,
        config.tree_depth,
        config.as_states,
    )?;

    let elapsed_fit = stage_start.elapsed().as_secs_f64();
    stage_start = Instant::now();
    info!(tree_size = predictor.tree_len(), "model fitted");

    // Stage 6: predict, over the test transactions when given.
    let test_store = match &config.test {
        Some(test_path) => {
            let mut store = TimelineStore::new(roster, vocabulary);
            for line in open_lines(test_path, "'test'")? {
                let line = line?;
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    continue;
                }
                scan_row(&mut store, line);
            }
            Some(store)
        }
        None => None,
    };

    let predictions = match &test_store {
        Some(store) => predictor.predict_map(store.timelines()),
        None => predictor.predict_all(),
    };

    let elapsed_predict = stage_start.elapsed().as_secs_f64();
    info!(num_predictions = predictions.len(), "predictions done");

    // Stage 7: output files.
    let Some(output_dir) = &config.output else {
        return Err(TempoError::Config("no 'output' folder given".to_string()));
    };
    if output_dir.exists() {
        return Err(TempoError::Config(format!(
            "file or folder '{}' already exists",
            output_dir.display()
        )));
    }
    fs::create_dir(output_dir)?;

    let timings = StageTimings {
        events: elapsed_events,
        clients: elapsed_clients,
        clips: elapsed_clips,
        target_map: elapsed_target_map,
        fit: elapsed_fit,
        predict: elapsed_predict,
        total: run_start.elapsed().as_secs_f64(),
    };

    let sizes = ObjectSizes {
        num_transactions,
        num_events: clips.vocabulary_len(),
        num_clients: clips.roster_len(),
        num_clips: clips.len(),
        num_points: clips.num_points(),
        num_test_clips: test_store.as_ref().map_or(0, TimelineStore::len),
        num_test_points: test_store.as_ref().map_or(0, TimelineStore::num_points),
        num_targets: predictor.num_targets(),
        tree_len: predictor.tree_len(),
        num_predictions: predictions.len(),
    };

    report::write_results(&output_dir.join("RESULTS.md"), config, &timings, &sizes)?;

    let eval_timelines = match &test_store {
        Some(store) => store.timelines(),
        None => predictor.timelines(),
    };
    report::write_predictions(
        &output_dir.join("PREDICTIONS.tsv"),
        &predictor,
        eval_timelines,
        &predictions,
    )?;

    info!(output = %output_dir.display(), "run complete");

    Ok(())
}

/// Feed one transaction row into a store. Malformed rows are dropped, as
/// are rows the store filters out.
fn scan_row(store: &mut TimelineStore, line: &str) -> bool {
    let mut fields = line.splitn(5, '\t');
    let (Some(emitter), Some(description), Some(weight), Some(client), Some(time)) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return false;
    };
    let Ok(weight) = weight.parse::<f64>() else {
        return false;
    };

    store.scan(emitter, description, weight, client, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_row_needs_five_columns() {
        let mut store = TimelineStore::new(Roster::new(), Vocabulary::new());
        assert!(!scan_row(&mut store, "a\tb\t1.0\tcli"));
        assert!(!scan_row(&mut store, "a\tb\theavy\tcli\t1970-01-02 00:00:00"));
    }
}
