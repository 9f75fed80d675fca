//! Plain-text result artifacts.
//!
//! - `devices.txt`, `gateways.txt`: one `index is: ...` line per node
//! - `buildings.txt`: gnuplot rectangles
//! - `summary.txt`: global sent/received, one line per gateway, then a legend

use anyhow::Context;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::simulation::layout::{write_building_listing, write_device_listing, write_gateway_listing};
use crate::simulation::metrics::{GatewayBreakdown, GlobalCount};
use crate::simulation::network::Scenario;

pub const DEVICES_FILE: &str = "devices.txt";
pub const GATEWAYS_FILE: &str = "gateways.txt";
pub const BUILDINGS_FILE: &str = "buildings.txt";
pub const SUMMARY_FILE: &str = "summary.txt";

/// Column legend printed after the per-gateway lines.
pub const GATEWAY_LEGEND: &str = "packets sent received interfered no more receivers under sensitivity lost because TX";

/// Render the summary block.
///
/// ```text
/// <sent> <received>
/// <gw> <sent> <received> <interfered> <no_more_receivers> <under_sensitivity> <lost_because_tx>
/// ...
/// packets sent received interfered no more receivers under sensitivity lost because TX
/// ```
pub fn format_summary(global: &GlobalCount, breakdown: &GatewayBreakdown) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", global.sent, global.received);
    for (gateway_id, row) in &breakdown.rows {
        let _ = writeln!(
            out,
            "{} {} {} {} {} {} {}",
            gateway_id,
            row.sent,
            row.received,
            row.interfered,
            row.no_more_receivers,
            row.under_sensitivity,
            row.lost_because_tx
        );
    }
    let _ = writeln!(out, "{}", GATEWAY_LEGEND);
    out
}

/// Write the node and building listings into `directory`.
pub fn write_layout_listings(directory: &Path, scenario: &Scenario) -> anyhow::Result<()> {
    fs::create_dir_all(directory).with_context(|| format!("Failed to create {}", directory.display()))?;

    write_file(&directory.join(DEVICES_FILE), |out| write_device_listing(out, &scenario.devices))?;
    write_file(&directory.join(GATEWAYS_FILE), |out| write_gateway_listing(out, &scenario.gateways))?;
    write_file(&directory.join(BUILDINGS_FILE), |out| write_building_listing(out, &scenario.buildings))?;
    Ok(())
}

/// Write `summary` to `summary.txt` in `directory` and return the file path.
pub fn write_summary(directory: &Path, summary: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(directory).with_context(|| format!("Failed to create {}", directory.display()))?;
    let path = directory.join(SUMMARY_FILE);
    fs::write(&path, summary).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn write_file<F>(path: &Path, body: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    body(&mut out)
        .and_then(|_| out.flush())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::metrics::OutcomeCounts;
    use std::collections::BTreeMap;

    #[test]
    fn summary_layout() {
        let global = GlobalCount { sent: 10, received: 7 };
        let mut rows = BTreeMap::new();
        rows.insert(
            0,
            OutcomeCounts {
                sent: 10,
                received: 6,
                interfered: 2,
                no_more_receivers: 0,
                under_sensitivity: 1,
                lost_because_tx: 1,
            },
        );
        rows.insert(
            1,
            OutcomeCounts {
                sent: 10,
                received: 3,
                under_sensitivity: 7,
                ..Default::default()
            },
        );
        let breakdown = GatewayBreakdown {
            rows,
            observed_senders: 10,
            expected_senders: 10,
        };
        let text = format_summary(&global, &breakdown);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["10 7", "0 10 6 2 0 1 1", "1 10 3 0 0 7 0", GATEWAY_LEGEND]);
    }
}
