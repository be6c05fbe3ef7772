use std::{fs, path::Path, str::FromStr};

use tracing::{info, instrument, warn};
use url::Url;

use crate::{error, types::Target};

/// Read the target list at `path`.
#[instrument(err)]
pub fn load(path: &Path) -> Result<Vec<Target>, error::TargetList> {
    let contents = fs::read_to_string(path).map_err(error::TargetList::Read)?;
    let targets = parse(&contents);
    info!(num_targets = targets.len(), "Loaded target list");
    Ok(targets)
}

/// Parse `label,url` lines. Blank lines, `#` comments and lines without a
/// comma are ignored. A repeated label keeps its first position but takes
/// the last URL.
pub fn parse(contents: &str) -> Vec<Target> {
    let mut targets: Vec<Target> = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((label, url)) = line.split_once(',') else {
            continue;
        };
        let (label, url) = (label.trim(), url.trim());
        if label.is_empty() || url.is_empty() {
            continue;
        }
        let url = match Url::from_str(url) {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    line = line_no + 1,
                    label,
                    error = %e,
                    "Skipping line with invalid URL"
                );
                continue;
            }
        };
        match targets.iter_mut().find(|t| t.label == label) {
            Some(existing) => existing.url = url,
            None => targets.push(Target {
                label: label.to_string(),
                url,
            }),
        }
    }
    targets
}
