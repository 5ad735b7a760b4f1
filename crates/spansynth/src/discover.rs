use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use glob::Pattern;

const PLAYWRIGHT_PATTERNS: [&str; 3] = ["playwright-report/*.json", "report.json", "results.json"];
const K6_SUMMARY_PATTERNS: [&str; 1] = ["summary.json"];
const K6_NDJSON_PATTERNS: [&str; 2] = ["*.ndjson", "metrics.json"];

/// Artifacts found in one worker run directory, each list sorted by path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub playwright: Vec<PathBuf>,
    pub k6_summary: Vec<PathBuf>,
    pub k6_ndjson: Vec<PathBuf>,
}

impl RunArtifacts {
    pub fn is_empty(&self) -> bool {
        self.playwright.is_empty() && self.k6_summary.is_empty() && self.k6_ndjson.is_empty()
    }

    pub fn len(&self) -> usize {
        self.playwright.len() + self.k6_summary.len() + self.k6_ndjson.len()
    }
}

pub fn discover(dir: &Path) -> anyhow::Result<RunArtifacts> {
    anyhow::ensure!(dir.is_dir(), "{} is not a directory", dir.display());
    let root = dir
        .to_str()
        .with_context(|| format!("run directory {} is not valid utf-8", dir.display()))?;
    let root = Pattern::escape(root);

    Ok(RunArtifacts {
        playwright: matching(&root, &PLAYWRIGHT_PATTERNS)?,
        k6_summary: matching(&root, &K6_SUMMARY_PATTERNS)?,
        k6_ndjson: matching(&root, &K6_NDJSON_PATTERNS)?,
    })
}

fn matching(root: &str, patterns: &[&str]) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    for pattern in patterns {
        let full = format!("{root}/{pattern}");
        for entry in glob::glob(&full).with_context(|| format!("bad pattern {full}"))? {
            match entry {
                Ok(path) if path.is_file() => {
                    found.insert(path);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "skipping unreadable path"),
            }
        }
    }
    Ok(found.into_iter().collect())
}
