//! Parsing of yt-dlp progress output
//!
//! The extractor asks yt-dlp for a machine-readable line per update through
//! `--progress-template`:
//!
//! ```text
//! progress:<downloaded_bytes>:<total_bytes>:<speed>:<eta>
//! ```
//!
//! Any field may be `NA`. The human-readable `[download]  45.3% of ...` line
//! is parsed as a fallback for older yt-dlp builds that ignore the template.

use crate::types::ItemProgress;
use regex::Regex;
use std::sync::OnceLock;

/// Template passed to `--progress-template`
pub const PROGRESS_TEMPLATE: &str = "download:progress:%(progress.downloaded_bytes)s:%(progress.total_bytes)s:%(progress.speed)s:%(progress.eta)s";

fn default_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(
            r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%\s+of\s+~?\s*(?P<size>[\d.]+\s*[KMGT]?i?B)(?:\s+at\s+(?P<speed>[\d.]+\s*[KMGT]?i?B)/s)?(?:\s+ETA\s+(?P<eta>[\d:]+))?",
        )
        .unwrap()
    })
}

/// Parse one line of yt-dlp stdout; returns None for non-progress lines
pub fn parse_progress_line(line: &str) -> Option<ItemProgress> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("progress:") {
        return parse_template_line(rest);
    }
    parse_default_line(line)
}

fn parse_template_line(rest: &str) -> Option<ItemProgress> {
    let fields: Vec<&str> = rest.split(':').collect();
    if fields.len() != 4 {
        return None;
    }

    let number = |s: &str| -> Option<f64> {
        if s == "NA" || s == "None" {
            None
        } else {
            s.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
        }
    };

    let downloaded = number(fields[0]).map(|v| v as u64);
    let total = number(fields[1]).map(|v| v as u64);
    let percent = match (downloaded, total) {
        (Some(d), Some(t)) if t > 0 => Some(((d as f64 / t as f64) * 100.0).min(100.0) as f32),
        _ => None,
    };

    Some(ItemProgress {
        percent,
        downloaded_bytes: downloaded,
        total_bytes: total,
        speed_bps: number(fields[2]).map(|v| v as u64),
        eta_secs: number(fields[3]).map(|v| v as u64),
    })
}

fn parse_default_line(line: &str) -> Option<ItemProgress> {
    let caps = default_line_re().captures(line)?;
    let percent: f32 = caps.name("pct")?.as_str().parse().ok()?;
    let total = caps.name("size").and_then(|m| parse_size(m.as_str()));

    Some(ItemProgress {
        percent: Some(percent.min(100.0)),
        downloaded_bytes: total.map(|t| (t as f64 * f64::from(percent) / 100.0) as u64),
        total_bytes: total,
        speed_bps: caps.name("speed").and_then(|m| parse_size(m.as_str())),
        eta_secs: caps.name("eta").and_then(|m| parse_clock(m.as_str())),
    })
}

/// "12.5MiB" → bytes
fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = text.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// "01:02:03" / "02:03" → seconds
fn parse_clock(text: &str) -> Option<u64> {
    text.split(':')
        .try_fold(0u64, |acc, part| Some(acc * 60 + part.parse::<u64>().ok()?))
}
