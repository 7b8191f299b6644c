//! Install-disk autodetection through `lsblk`.

use crate::command::ToolCommand;
use log::{debug, info};
use partinject_core::error::{InjectError, InjectResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A whole-disk block device as listed by `lsblk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,
    pub model: String,
    pub size: u64,
    pub rotational: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct LsblkCommand {
    tool: ToolCommand,
}

impl LsblkCommand {
    pub(crate) fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }

    pub(crate) fn list_disks(&self) -> InjectResult<Vec<BlockDevice>> {
        let out = self.tool.run([
            "-Pbia",
            "--nodeps",
            "-o",
            "KNAME,MODEL,SIZE,ROTA,TYPE",
        ])?;
        if !out.success() {
            return Err(InjectError::Provider(format!(
                "{} failed to list block devices: {} (exit code {})",
                self.tool.binary().display(),
                out.diagnostic(),
                out.status
            )));
        }
        Ok(parse_lsblk_output(&out.stdout))
    }
}

/// Parse `lsblk -P` key/value output, keeping only `TYPE="disk"` rows.
pub(crate) fn parse_lsblk_output(output: &str) -> Vec<BlockDevice> {
    static PAIR_RE: OnceLock<Regex> = OnceLock::new();
    let re = PAIR_RE
        .get_or_init(|| Regex::new(r#"([A-Z:\-]+)="([^"]*)""#).expect("valid lsblk regex"));

    output
        .lines()
        .filter_map(|line| {
            let fields: HashMap<&str, &str> = re
                .captures_iter(line)
                .filter_map(|caps| {
                    let key = caps.get(1)?.as_str();
                    let value = caps.get(2)?.as_str();
                    Some((key, value))
                })
                .collect();

            if fields.get("TYPE").copied() != Some("disk") {
                return None;
            }
            let kname = fields.get("KNAME").copied().filter(|name| !name.is_empty())?;
            Some(BlockDevice {
                name: format!("/dev/{kname}"),
                model: fields.get("MODEL").copied().unwrap_or("").trim().to_string(),
                size: fields
                    .get("SIZE")
                    .and_then(|size| size.parse().ok())
                    .unwrap_or(0),
                rotational: fields.get("ROTA").copied() == Some("1"),
            })
        })
        .collect()
}

/// Smallest disk of at least `min_size` bytes; the first listed wins ties.
pub(crate) fn select_install_device(disks: &[BlockDevice], min_size: u64) -> Option<&BlockDevice> {
    let mut selected: Option<&BlockDevice> = None;
    for disk in disks {
        if disk.size < min_size {
            debug!(
                "skipping {} ({} bytes): smaller than {min_size} bytes",
                disk.name, disk.size
            );
            continue;
        }
        if selected.map_or(true, |best| disk.size < best.size) {
            selected = Some(disk);
        }
    }
    if let Some(disk) = selected {
        info!(
            "selected install device {} ({} bytes, model \"{}\", {})",
            disk.name,
            disk.size,
            disk.model,
            if disk.rotational { "rotational" } else { "non-rotational" }
        );
    }
    selected
}
