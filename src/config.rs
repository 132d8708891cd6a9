//! Run configuration decoded from `key=value` command line tokens

use std::path::PathBuf;

use crate::error::{Result, TempoError};
use crate::predictor::{Aggregate, Transform};

/// Everything one batch run needs, with the documented defaults applied.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Transaction file: `emitter \t description \t weight \t client \t time`.
    pub transactions: Option<PathBuf>,
    /// Maximum number of auto-detected events (required unless `events` is given).
    pub max_events: Option<usize>,
    /// Explicit event definitions: `emitter \t description \t weight \t code`.
    pub events: Option<PathBuf>,
    /// Optional client allow-list, one id per line.
    pub clients: Option<PathBuf>,
    /// Target times: `client \t time`.
    pub targets: Option<PathBuf>,
    /// Optional alternative to `transactions` for fitting.
    pub train: Option<PathBuf>,
    /// Optional alternative to `transactions` for predicting.
    pub test: Option<PathBuf>,
    /// Output directory; must not pre-exist.
    pub output: Option<PathBuf>,
    pub transform: Transform,
    pub aggregate: Aggregate,
    pub fit_p: f64,
    pub tree_depth: usize,
    pub as_states: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            transactions: None,
            max_events: None,
            events: None,
            clients: None,
            targets: None,
            train: None,
            test: None,
            output: None,
            transform: Transform::Log,
            aggregate: Aggregate::Minimax,
            fit_p: 0.9,
            tree_depth: 8,
            as_states: false,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TempoError::Config(format!("invalid value '{value}' for '{key}'")))
}

impl RunConfig {
    /// Decode a list of `key=value` tokens, applying defaults for anything
    /// not given. Unknown keys and malformed tokens are errors.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut config = Self::default();

        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg.split_once('=') else {
                return Err(TempoError::Config(format!(
                    "expected KEY=VALUE, got '{arg}'"
                )));
            };

            match key {
                "transactions" => config.transactions = Some(value.into()),
                "max_events" => config.max_events = Some(parse_number(key, value)?),
                "events" => config.events = Some(value.into()),
                "clients" => config.clients = Some(value.into()),
                "targets" => config.targets = Some(value.into()),
                "train" => config.train = Some(value.into()),
                "test" => config.test = Some(value.into()),
                "output" => config.output = Some(value.into()),
                "transform" => config.transform = value.parse()?,
                "aggregate" => config.aggregate = value.parse()?,
                "fit_p" => config.fit_p = parse_number(key, value)?,
                "tree_depth" => config.tree_depth = parse_number(key, value)?,
                "as_states" => config.as_states = parse_number::<i64>(key, value)? != 0,
                _ => {
                    return Err(TempoError::Config(format!("unknown argument '{key}'")));
                }
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_args::<&str>(&[]).unwrap();
        assert_eq!(config.transform, Transform::Log);
        assert_eq!(config.aggregate, Aggregate::Minimax);
        assert_eq!(config.fit_p, 0.9);
        assert_eq!(config.tree_depth, 8);
        assert!(!config.as_states);
        assert!(config.transactions.is_none());
    }

    #[test]
    fn test_full_parse() {
        let config = RunConfig::from_args(&[
            "transactions=rows.tsv",
            "max_events=500",
            "targets=targets.tsv",
            "output=out",
            "transform=linear",
            "aggregate=longest",
            "fit_p=0.5",
            "tree_depth=12",
            "as_states=1",
        ])
        .unwrap();

        assert_eq!(config.transactions.as_deref(), Some("rows.tsv".as_ref()));
        assert_eq!(config.max_events, Some(500));
        assert_eq!(config.transform, Transform::Linear);
        assert_eq!(config.aggregate, Aggregate::Longest);
        assert_eq!(config.fit_p, 0.5);
        assert_eq!(config.tree_depth, 12);
        assert!(config.as_states);
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert!(RunConfig::from_args(&["no_equals"]).is_err());
        assert!(RunConfig::from_args(&["mystery=1"]).is_err());
        assert!(RunConfig::from_args(&["transform=cubic"]).is_err());
        assert!(RunConfig::from_args(&["aggregate=median"]).is_err());
        assert!(RunConfig::from_args(&["fit_p=much"]).is_err());
    }
}
